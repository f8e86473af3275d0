/*!
# Scene Culling

Scene-level culling and caching for a 2D/3D engine.

This crate decides, each frame, which parts of a scene are worth
submitting to the rendering, physics and navigation servers. The servers
themselves stay behind narrow traits; every subsystem only holds opaque
handles (`Rid`) to what it created.

## Architecture

- **TileMap**: sparse cell grid batched into quadrants, each owning its
  canvas items, physics shapes, light occluders and navigation regions,
  rebuilt lazily before draw
- **SpatialIndexer2D**: grid-hashed index of visibility notifiers against
  viewports, emitting enter/exit events
- **PortalScenario**: rooms-and-portals visibility with a precomputed
  potentially-visible set and occluder culling
- **ResourcePreviewer**: background thumbnail generation with an LRU
  memory cache and an on-disk cache
*/

// Internal modules
mod error;
mod engine;
mod dispatch;
pub mod log;
pub mod math;
pub mod servers;
pub mod tile_map;
pub mod visibility;
pub mod portal;
pub mod preview;

// Main culling namespace module
pub mod culling {
    // Error types
    pub use crate::error::{Error, Result};

    // Service holder
    pub use crate::engine::Engine;

    // Deferred calls and typed observers
    pub use crate::dispatch::{EventSinks, MessageQueue, SinkId};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
        // Note: engine_* macros are NOT re-exported here - they are internal only
    }

    pub mod servers {
        pub use crate::servers::*;
    }

    pub mod math {
        pub use crate::math::*;
    }

    pub mod tile_map {
        pub use crate::tile_map::*;
    }

    pub mod visibility {
        pub use crate::visibility::*;
    }

    pub mod portal {
        pub use crate::portal::*;
    }

    pub mod preview {
        pub use crate::preview::*;
    }
}

// Re-export math library at crate root
pub use glam;

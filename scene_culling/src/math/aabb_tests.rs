use super::*;

#[test]
fn test_aabb_from_points() {
    let aabb = AABB::from_points(&[
        Vec3::new(1.0, -2.0, 0.0),
        Vec3::new(-1.0, 4.0, 2.0),
        Vec3::new(0.0, 0.0, -3.0),
    ])
    .unwrap();
    assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, -3.0));
    assert_eq!(aabb.max, Vec3::new(1.0, 4.0, 2.0));
    assert!(AABB::from_points(&[]).is_none());
}

#[test]
fn test_aabb_center_and_radius() {
    let aabb = AABB::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(3.0, 1.0, 1.0));
    assert_eq!(aabb.center(), Vec3::new(1.0, 0.0, 0.0));
    assert!((aabb.bounding_radius() - 6.0f32.sqrt()).abs() < 1e-6);
}

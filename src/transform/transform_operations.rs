//! Transform operations - composing lattice and target spaces

use super::transform_data::{BonePose, LatticeTransformPair};
use glam::{Mat4, Vec3};

/// Compose the matrices for applying one lattice to one target
///
/// Both transforms may move every frame, so this is evaluated per lattice per
/// target per dispatch.
pub fn lattice_transform_pair(
    lattice_world_to_local: Mat4,
    target_local_to_world: Mat4,
) -> LatticeTransformPair {
    let object_to_lattice = lattice_world_to_local * target_local_to_world;
    LatticeTransformPair {
        object_to_lattice,
        lattice_to_object: object_to_lattice.inverse(),
    }
}

/// Local-to-world transform to use for skin-deformed vertices
///
/// Skinned vertices are expressed relative to the root bone, so its
/// translation and rotation are used with unit scale. Without a root bone the
/// object's own transform is used.
pub fn skinned_local_to_world(root_bone: Option<&BonePose>, fallback: Mat4) -> Mat4 {
    match root_bone {
        Some(pose) => {
            Mat4::from_scale_rotation_translation(Vec3::ONE, pose.rotation, pose.position)
        }
        None => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_pair_maps_target_into_lattice_and_back() {
        let lattice_to_world = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 4.0, 1.0),
            Quat::from_rotation_y(0.3),
            Vec3::new(-1.0, 0.0, 3.0),
        );
        let target_to_world = Mat4::from_translation(Vec3::new(5.0, 1.0, 0.0));
        let pair = lattice_transform_pair(lattice_to_world.inverse(), target_to_world);

        let object_point = Vec3::new(0.25, -0.5, 1.0);
        let world = target_to_world.transform_point3(object_point);
        let expected = lattice_to_world.inverse().transform_point3(world);
        assert!(pair.object_to_lattice.transform_point3(object_point).abs_diff_eq(expected, 1e-5));

        let back = pair.lattice_to_object.transform_point3(expected);
        assert!(back.abs_diff_eq(object_point, 1e-4));
    }

    #[test]
    fn test_skinned_transform_ignores_scale_and_falls_back() {
        let pose = BonePose {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        };
        let fallback = Mat4::from_scale(Vec3::splat(10.0));

        let from_bone = skinned_local_to_world(Some(&pose), fallback);
        let (scale, rotation, translation) = from_bone.to_scale_rotation_translation();
        assert!(scale.abs_diff_eq(Vec3::ONE, 1e-5));
        assert!(rotation.abs_diff_eq(pose.rotation, 1e-5));
        assert_eq!(translation, pose.position);

        assert_eq!(skinned_local_to_world(None, fallback), fallback);
    }
}

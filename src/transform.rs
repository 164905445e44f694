use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Unit, UnitQuaternion, Vector3};

/// Builds a rotation matrix around `axis` by an angle given in degrees.
///
/// Degenerate axes produce the identity, matching how an unset rotation is
/// treated in the source document.
pub fn axis_angle_matrix(axis: Vector3<f32>, angle_degrees: f32) -> Matrix4<f32> {
    if axis.norm_squared() <= f32::EPSILON {
        return Matrix4::identity();
    }
    Matrix4::from_axis_angle(&Unit::new_normalize(axis), angle_degrees.to_radians())
}

/// Splits an affine matrix into translation, rotation and scale.
///
/// A mirrored basis is folded into a negative X scale so the remaining
/// rotation stays proper. The returned quaternion is normalized.
pub fn decompose(matrix: &Matrix4<f32>) -> (Vector3<f32>, UnitQuaternion<f32>, Vector3<f32>) {
    let translation = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);

    let axes = [0usize, 1, 2].map(|c| Vector3::new(matrix[(0, c)], matrix[(1, c)], matrix[(2, c)]));
    let mut scale = Vector3::new(axes[0].norm(), axes[1].norm(), axes[2].norm());

    let basis = Matrix3::from_columns(&axes);
    if basis.determinant() < 0.0 {
        scale.x = -scale.x;
    }

    let unit_axes = [0usize, 1, 2].map(|i| {
        if scale[i].abs() > f32::EPSILON {
            axes[i] / scale[i]
        } else {
            Vector3::ith(i, 1.0)
        }
    });
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
        Matrix3::from_columns(&unit_axes),
    ));

    (translation, renormalize(rotation), scale)
}

/// Re-normalizes an accumulated quaternion.
pub fn renormalize(rotation: UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::new_normalize(rotation.into_inner())
}

/// Rebuilds an inverse bind matrix for a node bound below a parent whose
/// inverse bind matrix is known. Falls back to the parent's inverse when the
/// local transform is singular.
pub fn chain_inverse_bind_matrix(
    parent_inverse_bind: &Matrix4<f32>,
    local_transform: &Matrix4<f32>,
) -> Matrix4<f32> {
    match local_transform.try_inverse() {
        Some(local_inverse) => local_inverse * parent_inverse_bind,
        None => *parent_inverse_bind,
    }
}

pub fn inverse_or_identity(matrix: &Matrix4<f32>) -> Matrix4<f32> {
    matrix.try_inverse().unwrap_or_else(Matrix4::identity)
}

pub fn transform_position(matrix: &Matrix4<f32>, position: &Vector3<f32>) -> Vector3<f32> {
    matrix.transform_point(&Point3::from(*position)).coords
}

/// Row-major copy used by the serialized native formats.
pub fn matrix_to_rows(matrix: &Matrix4<f32>) -> [[f32; 4]; 4] {
    let mut rows = [[0.0f32; 4]; 4];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = matrix[(r, c)];
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose(
        translation: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        scale: Vector3<f32>,
    ) -> Matrix4<f32> {
        Matrix4::new_translation(&translation)
            * rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&scale)
    }

    #[test]
    fn given_trs_when_composing_and_decomposing_then_components_are_recovered() {
        let t = Vector3::new(1.0, -2.0, 3.5);
        let r = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        let s = Vector3::new(2.0, 0.5, 1.5);

        let (t2, r2, s2) = decompose(&compose(t, r, s));

        assert!((t - t2).norm() < 1e-4);
        assert!((s - s2).norm() < 1e-4);
        assert!(r.angle_to(&r2) < 1e-3);
    }

    #[test]
    fn given_zero_axis_when_building_rotation_then_identity_is_returned() {
        let m = axis_angle_matrix(Vector3::zeros(), 45.0);
        assert!((m - Matrix4::identity()).norm() < 1e-6);
    }

    #[test]
    fn given_parent_inverse_when_chaining_then_child_bind_world_is_inverted() {
        let parent_world = Matrix4::new_translation(&Vector3::new(0.0, 1.0, 0.0));
        let local = Matrix4::new_translation(&Vector3::new(2.0, 0.0, 0.0));
        let parent_inverse = parent_world.try_inverse().expect("invertible");

        let child_inverse = chain_inverse_bind_matrix(&parent_inverse, &local);

        let identity = parent_world * local * child_inverse;
        assert!((identity - Matrix4::identity()).norm() < 1e-5);
    }
}

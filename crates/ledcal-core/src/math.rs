use nalgebra::{RealField, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;

/// Rotate `p` by the axis-angle vector `w` (Rodrigues' formula).
///
/// Below `|w|^2 < eps` the first-order form `p + w x p` is used so the
/// function keeps finite derivatives at the zero rotation.
pub fn rotate_axis_angle<T: RealField>(w: &Vector3<T>, p: &Vector3<T>) -> Vector3<T> {
    let theta2 = w.dot(w);
    if theta2.clone() > T::from_f64(Real::EPSILON).unwrap() {
        let theta = theta2.sqrt();
        let cos_theta = theta.clone().cos();
        let sin_theta = theta.clone().sin();
        let axis = w / theta;
        let axis_cross_p = axis.cross(p);
        let tmp = axis.dot(p) * (T::one() - cos_theta.clone());
        p * cos_theta + axis_cross_p * sin_theta + axis * tmp
    } else {
        p + w.cross(p)
    }
}

//! Bounding boxes, centroids and object transforms.

use cgmath::{
    EuclideanSpace, InnerSpace, Matrix4, Point3, Quaternion, Rad, SquareMatrix, Vector3, Zero,
};

/// The 8 corners of a local space bounding box.
pub type Corners = [Point3<f32>; 8];

/// Builds the axis aligned bounding box of `points`, with corners in the order Blender uses for
/// `Object.bound_box`. Without any point every corner sits at the origin, which is what Blender
/// reports for objects without geometry.
pub fn bounding_box<I>(points: I) -> Corners
where
    I: IntoIterator<Item = Point3<f32>>,
{
    let mut points = points.into_iter();

    let first = match points.next() {
        Some(p) => p,
        None => return [Point3::origin(); 8],
    };

    let (min, max) = points.fold((first, first), |(min, max), p| {
        (
            Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z)),
            Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z)),
        )
    });

    [
        Point3::new(min.x, min.y, min.z),
        Point3::new(min.x, min.y, max.z),
        Point3::new(min.x, max.y, max.z),
        Point3::new(min.x, max.y, min.z),
        Point3::new(max.x, min.y, min.z),
        Point3::new(max.x, min.y, max.z),
        Point3::new(max.x, max.y, max.z),
        Point3::new(max.x, max.y, min.z),
    ]
}

/// Arithmetic mean of the corners, every corner weighted `0.125`.
pub fn centroid(corners: &Corners) -> Point3<f32> {
    let sum = corners
        .iter()
        .fold(Vector3::zero(), |acc, corner| acc + corner.to_vec());
    Point3::from_vec(sum * 0.125)
}

/// Applies an affine transform to a point (`w = 1`, no perspective divide).
pub fn transform_point(matrix: &Matrix4<f32>, point: Point3<f32>) -> Point3<f32> {
    Point3::from_vec((*matrix * point.to_homogeneous()).truncate())
}

/// Order in which Euler angles are applied. `Xyz` rotates around X first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EulerOrder {
    Xyz,
    Xzy,
    Yxz,
    Yzx,
    Zxy,
    Zyx,
}

/// The rotation of an object as Blender stores it, selected by `Object.rotmode`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Rotation {
    /// `w, x, y, z`
    Quaternion([f32; 4]),
    AxisAngle { axis: [f32; 3], angle: f32 },
    Euler { angles: [f32; 3], order: EulerOrder },
}

impl Rotation {
    /// Maps Blender's `rotmode` to a rotation built from the matching fields.
    pub fn from_rotmode(
        rotmode: i16,
        euler: [f32; 3],
        quat: [f32; 4],
        axis: [f32; 3],
        angle: f32,
    ) -> Rotation {
        let order = match rotmode {
            0 => return Rotation::Quaternion(quat),
            -1 => return Rotation::AxisAngle { axis, angle },
            2 => EulerOrder::Xzy,
            3 => EulerOrder::Yxz,
            4 => EulerOrder::Yzx,
            5 => EulerOrder::Zxy,
            6 => EulerOrder::Zyx,
            _ => EulerOrder::Xyz,
        };
        Rotation::Euler {
            angles: euler,
            order,
        }
    }

    pub fn matrix(&self) -> Matrix4<f32> {
        match *self {
            Rotation::Quaternion([w, x, y, z]) => {
                let q = Quaternion::new(w, x, y, z);
                if q.magnitude2() <= f32::EPSILON {
                    Matrix4::identity()
                } else {
                    Matrix4::from(q.normalize())
                }
            }
            Rotation::AxisAngle { axis, angle } => {
                let axis = Vector3::from(axis);
                if axis.magnitude2() <= f32::EPSILON {
                    Matrix4::identity()
                } else {
                    Matrix4::from_axis_angle(axis.normalize(), Rad(angle))
                }
            }
            Rotation::Euler { angles, order } => {
                let x = Matrix4::from_angle_x(Rad(angles[0]));
                let y = Matrix4::from_angle_y(Rad(angles[1]));
                let z = Matrix4::from_angle_z(Rad(angles[2]));
                match order {
                    EulerOrder::Xyz => z * y * x,
                    EulerOrder::Xzy => y * z * x,
                    EulerOrder::Yxz => z * x * y,
                    EulerOrder::Yzx => x * z * y,
                    EulerOrder::Zxy => y * x * z,
                    EulerOrder::Zyx => x * y * z,
                }
            }
        }
    }
}

/// `translation * rotation * scale`, the local matrix Blender builds from `loc`, the rotation fields and `size`.
pub fn compose_transform(
    location: Vector3<f32>,
    rotation: &Rotation,
    scale: Vector3<f32>,
) -> Matrix4<f32> {
    Matrix4::from_translation(location)
        * rotation.matrix()
        * Matrix4::from_nonuniform_scale(scale.x, scale.y, scale.z)
}

//! Read-only access to scene objects.
//!
//! The exporter only talks to the [`SceneObject`] trait. [`Scene`] implements the host side of it by reading the
//! objects, their geometry and the current selection out of a .blend file.

use crate::{
    geometry::{bounding_box, compose_transform, transform_point, Corners, Rotation},
    runtime::{AccessError, Blend, Instance},
};
use cgmath::{Matrix4, Point3, SquareMatrix, Vector3};
use linked_hash_map::LinkedHashMap;
use log::{debug, trace, warn};
use std::{collections::HashSet, num::NonZeroU64};
use thiserror::Error;

/// `Base.flag` bit for selected objects. Same bit in the pre 2.80 scene bases and in view layer bases.
const BASE_SELECTED: i32 = 1 << 0;
/// `CD_PROP_FLOAT3`, the custom data type of the `position` attribute.
const CD_PROP_FLOAT3: i32 = 48;
/// Parent chains longer than this are assumed to be a cycle.
const MAX_PARENT_DEPTH: usize = 64;

/// What the exporter needs to know about an object.
pub trait SceneObject {
    fn name(&self) -> &str;
    /// The raw `location` of the object, relative to its parent.
    fn location(&self) -> Point3<f32>;
    /// Local space bounding box corners, in Blender's `bound_box` order.
    fn bounding_box(&self) -> Corners;
    /// Maps a point from the object's local space to world space.
    fn world_transform(&self, point: Point3<f32>) -> Point3<f32>;
}

impl<T: SceneObject + ?Sized> SceneObject for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn location(&self) -> Point3<f32> {
        (**self).location()
    }

    fn bounding_box(&self) -> Corners {
        (**self).bounding_box()
    }

    fn world_transform(&self, point: Point3<f32>) -> Point3<f32> {
        (**self).world_transform(point)
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("could not read object '{name}'")]
    Object {
        name: String,
        #[source]
        source: AccessError,
    },
    #[error("could not read the selection of the scene")]
    Selection(#[source] AccessError),
}

/// An object read from a .blend file. Everything is copied out so the file can be dropped.
#[derive(Debug, Clone)]
pub struct BlendObject {
    name: String,
    location: Point3<f32>,
    world: Matrix4<f32>,
    bounds: Corners,
}

impl BlendObject {
    pub fn new(name: String, location: Point3<f32>, world: Matrix4<f32>, bounds: Corners) -> Self {
        BlendObject {
            name,
            location,
            world,
            bounds,
        }
    }

    /// Reads an `Object` struct (an `OB` block).
    pub fn from_instance(object: &Instance) -> Result<Self, AccessError> {
        let id_name = object.get("id")?.get_string("name")?;
        // ID names carry the two letter block code, "OBCube" is shown as "Cube"
        let name = id_name.get(2..).unwrap_or_default().to_owned();

        let location = Point3::from(vec3(&object.get_f32_vec("loc")?));
        let world = world_matrix(object, 0)?;
        let bounds = bounding_box(object_vertices(object, &name)?);

        trace!("read object '{}' at {:?}", name, location);

        Ok(BlendObject::new(name, location, world, bounds))
    }
}

impl SceneObject for BlendObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> Point3<f32> {
        self.location
    }

    fn bounding_box(&self) -> Corners {
        self.bounds
    }

    fn world_transform(&self, point: Point3<f32>) -> Point3<f32> {
        transform_point(&self.world, point)
    }
}

fn vec3(values: &[f32]) -> [f32; 3] {
    let mut out = [0.0; 3];
    for (o, v) in out.iter_mut().zip(values) {
        *o = *v;
    }
    out
}

fn vec4(values: &[f32]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (o, v) in out.iter_mut().zip(values) {
        *o = *v;
    }
    out
}

fn matrix(values: &[f32]) -> Matrix4<f32> {
    if values.len() < 16 {
        return Matrix4::identity();
    }
    // float[4][4] with the translation in the last row, which is a column major matrix
    let column = |c: usize| [values[c * 4], values[c * 4 + 1], values[c * 4 + 2], values[c * 4 + 3]];
    Matrix4::from([column(0), column(1), column(2), column(3)])
}

/// `short` in newer files, `int` in older ones.
fn read_flag(instance: &Instance, name: &str) -> Result<i32, AccessError> {
    instance
        .get_i32(name)
        .or_else(|_| instance.get_i16(name).map(i32::from))
}

/// Uses the matrix saved with the object. Files that don't store it get one built from the transform fields and
/// the parent chain.
fn world_matrix(object: &Instance, depth: usize) -> Result<Matrix4<f32>, AccessError> {
    for field in &["obmat", "object_to_world"] {
        if object.has_field(field) {
            return Ok(matrix(&object.get_f32_vec(field)?));
        }
    }

    let rotation = Rotation::from_rotmode(
        object.get_i16("rotmode").unwrap_or(1),
        vec3(&object.get_f32_vec("rot")?),
        vec4(&object.get_f32_vec("quat")?),
        vec3(&object.get_f32_vec("rotAxis")?),
        object.get_f32("rotAngle")?,
    );
    let local = compose_transform(
        Vector3::from(vec3(&object.get_f32_vec("loc")?)),
        &rotation,
        Vector3::from(vec3(&object.get_f32_vec("size")?)),
    );

    if depth < MAX_PARENT_DEPTH && object.is_valid("parent") {
        let parent = object.get("parent")?;
        let parent_inverse = matrix(&object.get_f32_vec("parentinv")?);
        Ok(world_matrix(&parent, depth + 1)? * parent_inverse * local)
    } else {
        Ok(local)
    }
}

/// Object data Blender computes bounds for that isn't read here: curves, text, surfaces, metaballs, lattices,
/// point clouds and volumes.
const UNREAD_GEOMETRY: &[[u8; 2]] = &[*b"CU", *b"CV", *b"MB", *b"LT", *b"PT", *b"VO"];

/// Local vertex positions of mesh objects. Other object types have no geometry here, so their bounding box
/// collapses to their origin.
fn object_vertices(object: &Instance, name: &str) -> Result<Vec<Point3<f32>>, AccessError> {
    if !object.is_valid("data") {
        return Ok(Vec::new());
    }

    let data = object.get("data")?;
    match data.code() {
        Some(code) if code == *b"ME" => mesh_vertices(&data),
        Some(code) => {
            let kind = String::from_utf8_lossy(&code).into_owned();
            if UNREAD_GEOMETRY.contains(&code) {
                warn!(
                    "'{}' has {} data, only mesh bounds are read so it is placed at its origin",
                    name, kind
                );
            } else {
                debug!("'{}' has {} data without geometry", name, kind);
            }
            Ok(Vec::new())
        }
        None => Ok(Vec::new()),
    }
}

fn mesh_vertices(mesh: &Instance) -> Result<Vec<Point3<f32>>, AccessError> {
    // Before 3.5 vertices are an array of MVert
    if mesh.is_valid("mvert") {
        return mesh
            .get_iter("mvert")?
            .iter()
            .map(|v| v.get_f32_vec("co").map(|co| Point3::from(vec3(&co))))
            .collect();
    }

    // Since 3.5 positions are a generic float3 attribute
    if mesh.has_field("vdata") {
        let vdata = mesh.get("vdata")?;
        if vdata.is_valid("layers") {
            for layer in vdata.get_iter("layers")? {
                let is_position = read_flag(&layer, "type")? == CD_PROP_FLOAT3
                    && layer.get_string("name")? == "position";

                if is_position && layer.is_valid("data") {
                    let floats = layer.get_f32_vec("data")?;
                    return Ok(floats
                        .chunks_exact(3)
                        .map(|c| Point3::new(c[0], c[1], c[2]))
                        .collect());
                }
            }
        }
    }

    debug!("mesh without readable vertices, using an empty bounding box");
    Ok(Vec::new())
}

/// Which objects of a scene are handed to the exporter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SelectionMode {
    /// Objects flagged as selected when the file was saved.
    Selected,
    /// Every object in the file.
    All,
}

/// The objects of a .blend file together with the selection that was active when it was saved.
#[derive(Debug, Default)]
pub struct Scene {
    /// File order.
    objects: LinkedHashMap<NonZeroU64, BlendObject>,
    /// Base order of the active view layer.
    selected: Vec<NonZeroU64>,
}

impl Scene {
    pub fn from_blend(blend: &Blend) -> Result<Scene, SceneError> {
        let mut objects = LinkedHashMap::new();

        for instance in blend.instances_with_code(*b"OB") {
            let object = BlendObject::from_instance(&instance).map_err(|source| {
                SceneError::Object {
                    name: instance
                        .get("id")
                        .and_then(|id| id.get_string("name"))
                        .unwrap_or_else(|_| String::from("?")),
                    source,
                }
            })?;

            if let Some(address) = instance.memory_address() {
                objects.insert(address, object);
            }
        }

        let selected = selected_objects(blend).map_err(SceneError::Selection)?;

        debug!(
            "scene has {} objects, {} selected",
            objects.len(),
            selected.len()
        );

        Ok(Scene { objects, selected })
    }

    pub fn objects(&self) -> impl Iterator<Item = &BlendObject> {
        self.objects.values()
    }

    pub fn selection(&self) -> impl Iterator<Item = &BlendObject> {
        self.selected
            .iter()
            .filter_map(move |address| self.objects.get(address))
    }

    pub fn select(&self, mode: SelectionMode) -> Vec<&BlendObject> {
        match mode {
            SelectionMode::Selected => self.selection().collect(),
            SelectionMode::All => self.objects().collect(),
        }
    }
}

/// Addresses of the objects selected in the active scene, in base order. `FileGlobal` records which scene and
/// view layer were active when the file was saved; files that don't say use their first scene and layer.
fn selected_objects(blend: &Blend) -> Result<Vec<NonZeroU64>, AccessError> {
    let global = blend.global();
    let current = |field: &str| {
        global
            .as_ref()
            .filter(|g| g.is_valid(field))
            .and_then(|g| g.get(field).ok())
    };

    let scene = match current("curscene").or_else(|| blend.instances_with_code(*b"SC").next()) {
        Some(scene) => scene,
        None => return Ok(Vec::new()),
    };

    let bases = if scene.has_field("view_layers") {
        let layers = scene.get_list("view_layers")?;
        let active = current("cur_view_layer").and_then(|layer| layer.memory_address());
        let layer = layers
            .iter()
            .find(|layer| active.is_some() && layer.memory_address() == active)
            .or_else(|| layers.first());

        match layer {
            Some(layer) => {
                debug!(
                    "selection from view layer '{}'",
                    layer.get_string("name").unwrap_or_default()
                );
                layer.get_list("object_bases")?
            }
            None => Vec::new(),
        }
    } else if scene.has_field("base") {
        scene.get_list("base")?
    } else {
        Vec::new()
    };

    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for base in bases {
        if read_flag(&base, "flag")? & BASE_SELECTED == 0 || !base.is_valid("object") {
            continue;
        }

        if let Some(address) = base.get("object")?.memory_address() {
            if seen.insert(address) {
                selected.push(address);
            }
        }
    }

    Ok(selected)
}

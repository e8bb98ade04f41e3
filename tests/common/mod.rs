//! Writes small .blend files for tests. The SDNA is made up by each test, the reader doesn't care as long as the
//! field names match the ones Blender uses.

#![allow(dead_code)]

use std::collections::HashMap;

const PRIMITIVES: &[(&str, usize)] = &[
    ("char", 1),
    ("short", 2),
    ("int", 4),
    ("float", 4),
    ("void", 0),
];
const POINTER_SIZE: usize = 8;

pub struct StructDef {
    pub name: &'static str,
    /// `(type, declaration)` like `("float", "co[3]")` or `("Base", "*next")`.
    pub fields: Vec<(&'static str, &'static str)>,
}

pub fn def(name: &'static str, fields: &[(&'static str, &'static str)]) -> StructDef {
    StructDef {
        name,
        fields: fields.to_vec(),
    }
}

fn field_name(decl: &str) -> &str {
    let decl = decl.trim_start_matches('*');
    match decl.find('[') {
        Some(i) => &decl[..i],
        None => decl,
    }
}

fn array_len(decl: &str) -> usize {
    decl.split('[')
        .skip(1)
        .map(|d| d.trim_end_matches(']').parse::<usize>().expect("array size"))
        .product()
}

struct FieldLayout {
    offset: usize,
    size: usize,
    type_name: &'static str,
    is_pointer: bool,
}

struct Layout {
    size: usize,
    fields: HashMap<String, FieldLayout>,
}

pub struct Dna {
    structs: Vec<StructDef>,
    layouts: HashMap<&'static str, Layout>,
}

impl Dna {
    pub fn new(structs: Vec<StructDef>) -> Dna {
        let mut layouts: HashMap<&'static str, Layout> = HashMap::new();

        for s in &structs {
            let mut offset = 0;
            let mut fields = HashMap::new();

            for (type_name, decl) in &s.fields {
                let is_pointer = decl.starts_with('*');
                let element = if is_pointer {
                    POINTER_SIZE
                } else {
                    PRIMITIVES
                        .iter()
                        .find(|(n, _)| n == type_name)
                        .map(|(_, size)| *size)
                        .or_else(|| layouts.get(type_name).map(|l| l.size))
                        .unwrap_or_else(|| panic!("unknown type {}", type_name))
                };
                let size = element * array_len(decl);

                fields.insert(
                    field_name(decl).to_owned(),
                    FieldLayout {
                        offset,
                        size,
                        type_name: *type_name,
                        is_pointer,
                    },
                );
                offset += size;
            }

            layouts.insert(
                s.name,
                Layout {
                    size: offset,
                    fields,
                },
            );
        }

        Dna { structs, layouts }
    }

    pub fn struct_index(&self, name: &str) -> u32 {
        self.structs
            .iter()
            .position(|s| s.name == name)
            .unwrap_or_else(|| panic!("unknown struct {}", name)) as u32
    }

    pub fn has_field(&self, struct_name: &str, field: &str) -> bool {
        self.layouts[struct_name].fields.contains_key(field)
    }

    pub fn record(&self, name: &'static str) -> Record<'_> {
        Record {
            dna: self,
            struct_name: name,
            data: vec![0; self.layouts[name].size],
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut names: Vec<&str> = Vec::new();
        for s in &self.structs {
            for (_, decl) in &s.fields {
                if !names.contains(decl) {
                    names.push(*decl);
                }
            }
        }

        let mut types: Vec<(&str, usize)> = PRIMITIVES.to_vec();
        for s in &self.structs {
            types.push((s.name, self.layouts[s.name].size));
        }
        let type_index = |name: &str| types.iter().position(|(n, _)| *n == name).expect("type") as u16;

        let mut out = Vec::new();
        out.extend_from_slice(b"SDNA");

        out.extend_from_slice(b"NAME");
        out.extend_from_slice(&(names.len() as u32).to_le_bytes());
        for n in &names {
            out.extend_from_slice(n.as_bytes());
            out.push(0);
        }
        pad(&mut out);

        out.extend_from_slice(b"TYPE");
        out.extend_from_slice(&(types.len() as u32).to_le_bytes());
        for (n, _) in &types {
            out.extend_from_slice(n.as_bytes());
            out.push(0);
        }
        pad(&mut out);

        out.extend_from_slice(b"TLEN");
        for (_, size) in &types {
            out.extend_from_slice(&(*size as u16).to_le_bytes());
        }
        pad(&mut out);

        out.extend_from_slice(b"STRC");
        out.extend_from_slice(&(self.structs.len() as u32).to_le_bytes());
        for s in &self.structs {
            out.extend_from_slice(&type_index(s.name).to_le_bytes());
            out.extend_from_slice(&(s.fields.len() as u16).to_le_bytes());
            for (type_name, decl) in &s.fields {
                let name_index = names.iter().position(|n| n == decl).expect("name") as u16;
                out.extend_from_slice(&type_index(*type_name).to_le_bytes());
                out.extend_from_slice(&name_index.to_le_bytes());
            }
        }

        out
    }
}

/// Sections are aligned relative to the start of the DNA1 data, which starts aligned.
fn pad(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// One struct instance, zeroed until fields are set. Paths can reach into inline structs: `"id.name"`.
pub struct Record<'d> {
    dna: &'d Dna,
    struct_name: &'static str,
    pub data: Vec<u8>,
}

impl<'d> Record<'d> {
    fn locate(&self, path: &str) -> (usize, usize) {
        let mut layout = &self.dna.layouts[self.struct_name];
        let mut base = 0;
        let mut parts = path.split('.').peekable();

        while let Some(part) = parts.next() {
            let field = layout
                .fields
                .get(part)
                .unwrap_or_else(|| panic!("unknown field {}", path));

            if parts.peek().is_none() {
                return (base + field.offset, field.size);
            }

            assert!(!field.is_pointer, "cannot walk through pointer {}", part);
            base += field.offset;
            layout = &self.dna.layouts[field.type_name];
        }

        unreachable!("empty path")
    }

    fn put(mut self, path: &str, bytes: &[u8]) -> Self {
        let (offset, size) = self.locate(path);
        assert!(bytes.len() <= size, "too much data for {}", path);
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn f32s(self, path: &str, values: &[f32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect();
        self.put(path, &bytes)
    }

    pub fn ptr(self, path: &str, address: u64) -> Self {
        self.put(path, &address.to_le_bytes())
    }

    pub fn i16(self, path: &str, value: i16) -> Self {
        self.put(path, &value.to_le_bytes())
    }

    pub fn i32(self, path: &str, value: i32) -> Self {
        self.put(path, &value.to_le_bytes())
    }

    /// Writes into a `short` or `int` field, whichever the layout has.
    pub fn int(self, path: &str, value: i32) -> Self {
        let (_, size) = self.locate(path);
        let bytes = value.to_le_bytes();
        self.put(path, &bytes[..size.min(bytes.len())])
    }

    pub fn string(self, path: &str, value: &str) -> Self {
        self.put(path, value.as_bytes())
    }
}

pub struct BlendWriter<'d> {
    dna: &'d Dna,
    large: bool,
    out: Vec<u8>,
}

impl<'d> BlendWriter<'d> {
    /// 64 bit little endian file with the pre 5.0 header, `version` like `"300"`.
    pub fn new(dna: &'d Dna, version: &str) -> Self {
        let mut out = b"BLENDER-v".to_vec();
        out.extend_from_slice(version.as_bytes());
        BlendWriter {
            dna,
            large: false,
            out,
        }
    }

    /// File with the 5.0 header and block headers.
    pub fn large(dna: &'d Dna) -> Self {
        BlendWriter {
            dna,
            large: true,
            out: b"BLENDER17-01v0500".to_vec(),
        }
    }

    fn header(&mut self, code: &[u8; 4], address: u64, dna_index: u32, len: usize, count: usize) {
        self.out.extend_from_slice(code);
        if self.large {
            self.out.extend_from_slice(&dna_index.to_le_bytes());
            self.out.extend_from_slice(&address.to_le_bytes());
            self.out.extend_from_slice(&(len as i64).to_le_bytes());
            self.out.extend_from_slice(&(count as i64).to_le_bytes());
        } else {
            self.out.extend_from_slice(&(len as u32).to_le_bytes());
            self.out.extend_from_slice(&address.to_le_bytes());
            self.out.extend_from_slice(&dna_index.to_le_bytes());
            self.out.extend_from_slice(&(count as u32).to_le_bytes());
        }
    }

    /// A block holding `records`, all of the same struct.
    pub fn block(&mut self, code: &[u8; 4], address: u64, records: &[Record]) -> &mut Self {
        let dna_index = self.dna.struct_index(records[0].struct_name);
        let data: Vec<u8> = records.iter().flat_map(|r| r.data.clone()).collect();
        self.header(code, address, dna_index, data.len(), records.len());
        self.out.extend_from_slice(&data);
        self
    }

    /// A `DATA` block of plain floats, typed as `struct_name`.
    pub fn floats(&mut self, address: u64, struct_name: &str, values: &[f32]) -> &mut Self {
        let dna_index = self.dna.struct_index(struct_name);
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect();
        let element = self.dna.layouts[struct_name].size;
        self.header(b"DATA", address, dna_index, data.len(), data.len() / element);
        self.out.extend_from_slice(&data);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        let dna = self.dna.encode();
        self.header(b"DNA1", 1, 0, dna.len(), 1);
        self.out.extend_from_slice(&dna);
        self.header(b"ENDB", 0, 0, 0, 0);
        std::mem::take(&mut self.out)
    }
}

/// Struct layouts shaped like Blender's, trimmed to the fields the exporter reads.
pub fn blender_dna(with_obmat: bool, view_layers: bool) -> Dna {
    let mut object = vec![
        ("ID", "id"),
        ("ID", "*data"),
        ("Object", "*parent"),
        ("float", "loc[3]"),
        ("float", "size[3]"),
        ("float", "rot[3]"),
        ("float", "quat[4]"),
        ("float", "rotAxis[3]"),
        ("float", "rotAngle"),
        ("short", "rotmode"),
        ("short", "flag"),
        ("float", "parentinv[4][4]"),
    ];
    if with_obmat {
        object.push(("float", "obmat[4][4]"));
    }

    let global = if view_layers {
        def(
            "FileGlobal",
            &[
                ("char", "subvstr[4]"),
                ("Scene", "*curscene"),
                ("ViewLayer", "*cur_view_layer"),
            ],
        )
    } else {
        def("FileGlobal", &[("char", "subvstr[4]"), ("Scene", "*curscene")])
    };

    let (base, scene) = if view_layers {
        (
            def(
                "Base",
                &[
                    ("Base", "*next"),
                    ("Base", "*prev"),
                    ("Object", "*object"),
                    ("short", "flag"),
                    ("short", "flag_legacy"),
                ],
            ),
            def("Scene", &[("ID", "id"), ("ListBase", "view_layers")]),
        )
    } else {
        (
            def(
                "Base",
                &[
                    ("Base", "*next"),
                    ("Base", "*prev"),
                    ("int", "lay"),
                    ("int", "flag"),
                    ("Object", "*object"),
                ],
            ),
            def("Scene", &[("ID", "id"), ("ListBase", "base")]),
        )
    };

    Dna::new(vec![
        def("ID", &[("void", "*next"), ("void", "*prev"), ("char", "name[66]")]),
        def("ListBase", &[("void", "*first"), ("void", "*last")]),
        def("vec3f", &[("float", "x"), ("float", "y"), ("float", "z")]),
        def(
            "MVert",
            &[
                ("float", "co[3]"),
                ("short", "no[3]"),
                ("char", "flag"),
                ("char", "bweight"),
            ],
        ),
        def(
            "CustomDataLayer",
            &[("int", "type"), ("char", "name[64]"), ("void", "*data")],
        ),
        def(
            "CustomData",
            &[("CustomDataLayer", "*layers"), ("int", "totlayer")],
        ),
        def(
            "Mesh",
            &[
                ("ID", "id"),
                ("MVert", "*mvert"),
                ("CustomData", "vdata"),
                ("int", "totvert"),
            ],
        ),
        def("Curve", &[("ID", "id"), ("short", "type")]),
        StructDef {
            name: "Object",
            fields: object,
        },
        base,
        def(
            "ViewLayer",
            &[
                ("ViewLayer", "*next"),
                ("ViewLayer", "*prev"),
                ("char", "name[64]"),
                ("ListBase", "object_bases"),
            ],
        ),
        scene,
        global,
    ])
}

/// The `GLOB` block naming the active scene and, in files with view layers, the active layer.
pub fn write_global(writer: &mut BlendWriter, dna: &Dna, scene: u64, view_layer: u64) {
    let global = dna.record("FileGlobal").ptr("curscene", scene);
    let global = if dna.has_field("FileGlobal", "cur_view_layer") {
        global.ptr("cur_view_layer", view_layer)
    } else {
        global
    };
    writer.block(b"GLOB", 0x10, &[global]);
}

/// 4x4 matrix as Blender saves it: translation in the last row.
pub fn translation(x: f32, y: f32, z: f32) -> [f32; 16] {
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        x, y, z, 1.0,
    ]
}

pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// The corners of a box from `min` to `max`.
pub fn box_vertices(min: [f32; 3], max: [f32; 3]) -> Vec<[f32; 3]> {
    let mut out = Vec::new();
    for &x in &[min[0], max[0]] {
        for &y in &[min[1], max[1]] {
            for &z in &[min[2], max[2]] {
                out.push([x, y, z]);
            }
        }
    }
    out
}

pub struct TestObject {
    pub name: &'static str,
    pub address: u64,
    pub loc: [f32; 3],
    pub obmat: [f32; 16],
    pub mesh: Option<u64>,
}

impl TestObject {
    pub fn new(name: &'static str, address: u64) -> Self {
        TestObject {
            name,
            address,
            loc: [0.0; 3],
            obmat: IDENTITY,
            mesh: None,
        }
    }

    pub fn at(mut self, loc: [f32; 3], obmat: [f32; 16]) -> Self {
        self.loc = loc;
        self.obmat = obmat;
        self
    }

    pub fn mesh(mut self, address: u64) -> Self {
        self.mesh = Some(address);
        self
    }

    /// The matrix is only written when the layout has `obmat`.
    pub fn record<'d>(&self, dna: &'d Dna) -> Record<'d> {
        let record = dna
            .record("Object")
            .string("id.name", &format!("OB{}", self.name))
            .ptr("data", self.mesh.unwrap_or(0))
            .f32s("loc", &self.loc)
            .f32s("size", &[1.0, 1.0, 1.0])
            .f32s("quat", &[1.0, 0.0, 0.0, 0.0])
            .i16("rotmode", 1)
            .f32s("parentinv", &IDENTITY);

        if dna.has_field("Object", "obmat") {
            record.f32s("obmat", &self.obmat)
        } else {
            record
        }
    }
}

/// Writes `bases` as a linked list of `Base` blocks, `(object address, selected)`, starting at `first_address`.
/// Returns the addresses of the first and last base.
pub fn write_bases(
    writer: &mut BlendWriter,
    dna: &Dna,
    first_address: u64,
    bases: &[(u64, bool)],
) -> (u64, u64) {
    let address = |i: usize| first_address + i as u64 * 0x10;

    for (i, (object, selected)) in bases.iter().enumerate() {
        let next = if i + 1 < bases.len() { address(i + 1) } else { 0 };
        let prev = if i > 0 { address(i - 1) } else { 0 };
        let base = dna
            .record("Base")
            .ptr("next", next)
            .ptr("prev", prev)
            .ptr("object", *object)
            .int("flag", if *selected { 1 } else { 0 });
        writer.block(b"DATA", address(i), &[base]);
    }

    if bases.is_empty() {
        (0, 0)
    } else {
        (address(0), address(bases.len() - 1))
    }
}

/// A mesh using the pre 3.5 `MVert` array.
pub fn write_mvert_mesh(
    writer: &mut BlendWriter,
    dna: &Dna,
    address: u64,
    name: &str,
    vertices: &[[f32; 3]],
) {
    let verts_address = address + 0x8;
    let mesh = dna
        .record("Mesh")
        .string("id.name", &format!("ME{}", name))
        .ptr("mvert", verts_address)
        .i32("totvert", vertices.len() as i32);
    writer.block(b"ME\0\0", address, &[mesh]);

    let verts: Vec<Record> = vertices
        .iter()
        .map(|v| dna.record("MVert").f32s("co", v))
        .collect();
    writer.block(b"DATA", verts_address, &verts);
}

/// A mesh storing positions in a `position` float3 attribute, like files since 3.5.
pub fn write_attribute_mesh(
    writer: &mut BlendWriter,
    dna: &Dna,
    address: u64,
    name: &str,
    vertices: &[[f32; 3]],
) {
    let layers_address = address + 0x8;
    let uv_address = address + 0xc;
    let positions_address = address + 0x10;

    let mesh = dna
        .record("Mesh")
        .string("id.name", &format!("ME{}", name))
        .ptr("vdata.layers", layers_address)
        .i32("vdata.totlayer", 2)
        .i32("totvert", vertices.len() as i32);
    writer.block(b"ME\0\0", address, &[mesh]);

    // An unrelated float2 layer first, the reader has to pick the right one
    let layers = [
        dna.record("CustomDataLayer")
            .i32("type", 49)
            .string("name", "uv")
            .ptr("data", uv_address),
        dna.record("CustomDataLayer")
            .i32("type", 48)
            .string("name", "position")
            .ptr("data", positions_address),
    ];
    writer.block(b"DATA", layers_address, &layers);

    writer.floats(uv_address, "vec3f", &[9.0, 9.0, 9.0]);
    let flat: Vec<f32> = vertices.iter().flat_map(|v| v.to_vec()).collect();
    writer.floats(positions_address, "vec3f", &flat);
}

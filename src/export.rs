//! Collects marker positions per category and writes them as a Lua table.
//!
//! Positions are gathered into [`Breadcrumbs`] first and only then rendered, so the geometry can be checked
//! without looking at text and the output file is never opened before the whole document exists.

use crate::{
    config::{ExportConfig, PositionStrategy, TableLayout},
    geometry::centroid,
    scene::SceneObject,
};
use cgmath::Point3;
use log::{debug, info, warn};
use std::{
    ffi::OsString,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Directory the output file is written to.
pub const OUTPUT_DIR_VAR: &str = "GROTTO_TOOLS_PATH";

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("environment variable {0} is not set")]
    MissingOutputDir(&'static str),
    #[error("could not write '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not echo the document")]
    Echo(#[source] io::Error),
}

impl PositionStrategy {
    pub fn position<O: SceneObject + ?Sized>(self, object: &O) -> Point3<f32> {
        match self {
            PositionStrategy::BoundsCentroid => {
                object.world_transform(centroid(&object.bounding_box()))
            }
            PositionStrategy::Location => object.location(),
        }
    }
}

/// Marker positions grouped by category, in category order. Inside a category, positions keep the order the
/// objects were given in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Breadcrumbs {
    categories: Vec<(String, Vec<[f32; 3]>)>,
}

impl Breadcrumbs {
    /// Objects matching several categories are listed in each of them. Objects matching none are left out.
    pub fn collect<I>(objects: I, config: &ExportConfig) -> Self
    where
        I: IntoIterator,
        I::Item: SceneObject,
    {
        let mut categories: Vec<_> = config
            .categories
            .iter()
            .map(|c| (c.label.clone(), Vec::new()))
            .collect();

        for object in objects {
            let mut position = None;

            for (category, (_, positions)) in config.categories.iter().zip(&mut categories) {
                if !category.matches(object.name()) {
                    continue;
                }

                let p = *position.get_or_insert_with(|| config.strategy.position(&object));
                debug!(
                    "{} '{}' at ({}, {}, {})",
                    category.label,
                    object.name(),
                    p.x,
                    p.y,
                    p.z
                );
                positions.push([p.x, p.y, p.z]);
            }
        }

        Breadcrumbs { categories }
    }

    pub fn get(&self, label: &str) -> Option<&[[f32; 3]]> {
        self.categories
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, positions)| &positions[..])
    }

    /// Total number of positions over all categories.
    pub fn len(&self) -> usize {
        self.categories.iter().map(|(_, p)| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders `return { label = { ... }, ... }`.
    pub fn to_lua(&self, layout: TableLayout) -> String {
        let mut out = String::from("return { ");

        for (i, (label, positions)) in self.categories.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            push_key(&mut out, label);
            out.push_str(" = { ");

            for [x, y, z] in positions {
                let triple = format!("{},{},{}", lua_number(*x), lua_number(*y), lua_number(*z));
                match layout {
                    TableLayout::Nested => {
                        out.push_str("{ ");
                        out.push_str(&triple);
                        out.push_str(" },");
                    }
                    TableLayout::Flat => {
                        out.push_str(&triple);
                        out.push(',');
                    }
                }
            }

            out.push_str(" }");
        }

        out.push_str(" }");
        out
    }
}

/// Six decimals like C's `%f`. Lua has no literal for NaN or infinity, so those become expressions.
fn lua_number(value: f32) -> String {
    if value.is_nan() {
        String::from("0/0")
    } else if value.is_infinite() {
        String::from(if value > 0.0 { "math.huge" } else { "-math.huge" })
    } else {
        format!("{:.6}", value)
    }
}

fn is_lua_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let starts_well = match chars.next() {
        Some(c) => c == '_' || c.is_ascii_alphabetic(),
        None => false,
    };

    starts_well
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !LUA_KEYWORDS.iter().any(|k| *k == s)
}

fn push_key(out: &mut String, label: &str) {
    if is_lua_identifier(label) {
        out.push_str(label);
        return;
    }

    out.push_str("[\"");
    for b in label.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            0x20..=0x7e => out.push(char::from(b)),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
    out.push_str("\"]");
}

/// `dir` joined with `file_name`.
pub fn output_path<P: AsRef<Path>>(dir: P, file_name: &str) -> PathBuf {
    dir.as_ref().join(file_name)
}

/// Resolves the output file inside the directory named by `GROTTO_TOOLS_PATH`.
pub fn output_path_from_env(file_name: &str) -> Result<PathBuf, ExportError> {
    output_path_from_var(std::env::var_os(OUTPUT_DIR_VAR), file_name)
}

fn output_path_from_var(dir: Option<OsString>, file_name: &str) -> Result<PathBuf, ExportError> {
    dir.map(|dir| output_path(dir, file_name))
        .ok_or(ExportError::MissingOutputDir(OUTPUT_DIR_VAR))
}

/// Creates or truncates `path` and writes the whole document. The file is closed when this returns.
pub fn write_breadcrumbs<P: AsRef<Path>>(path: P, document: &str) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(document.as_bytes())?;
    file.flush()
}

/// Collects, renders, echoes the document to `echo` and writes it to `path`. Returns what was written.
pub fn export<I, W>(
    objects: I,
    config: &ExportConfig,
    path: &Path,
    mut echo: W,
) -> Result<Breadcrumbs, ExportError>
where
    I: IntoIterator,
    I::Item: SceneObject,
    W: Write,
{
    let breadcrumbs = Breadcrumbs::collect(objects, config);
    if breadcrumbs.is_empty() {
        warn!("no object matched any category, writing empty tables");
    }
    let document = breadcrumbs.to_lua(config.layout);

    writeln!(echo, "{}", document).map_err(ExportError::Echo)?;

    write_breadcrumbs(path, &document).map_err(|source| ExportError::Write {
        path: path.to_owned(),
        source,
    })?;

    info!(
        "wrote {} breadcrumbs in {} categories to {}",
        breadcrumbs.len(),
        config.categories.len(),
        path.display()
    );

    Ok(breadcrumbs)
}

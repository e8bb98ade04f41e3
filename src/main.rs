use anyhow::{Context, Result};
use breadcrumb::{
    export::{self, output_path_from_env},
    Blend, ExportConfig, PositionStrategy, Scene, SelectionMode, TableLayout,
};
use clap::{Arg, ArgAction, Command};
use log::info;
use std::{io, path::PathBuf};

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("breadcrumb")
        .about("Writes the positions of the selected objects of a .blend file as Lua breadcrumb data")
        .arg(
            Arg::new("blend")
                .value_name("FILE")
                .help("The .blend file to read")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML file with categories, strategy and layout"),
        )
        .arg(
            Arg::new("preset")
                .short('p')
                .long("preset")
                .value_name("NAME")
                .help("Start from a preset instead of a config file")
                .value_parser(["centroid", "location"])
                .conflicts_with("config"),
        )
        .arg(
            Arg::new("strategy")
                .long("strategy")
                .value_name("STRATEGY")
                .help("Override how positions are computed")
                .value_parser(["bounds_centroid", "location"]),
        )
        .arg(
            Arg::new("layout")
                .long("layout")
                .value_name("LAYOUT")
                .help("Override how positions are written")
                .value_parser(["nested", "flat"]),
        )
        .arg(
            Arg::new("all")
                .short('a')
                .long("all")
                .help("Export every object instead of the saved selection")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("Output file, defaults to $GROTTO_TOOLS_PATH/<file_name>"),
        )
        .get_matches();

    let mut config = if let Some(path) = matches.get_one::<String>("config") {
        ExportConfig::load_from_file(path)?
    } else if let Some(preset) = matches.get_one::<String>("preset") {
        ExportConfig::preset(preset)?
    } else {
        ExportConfig::default()
    };

    match matches.get_one::<String>("strategy").map(String::as_str) {
        Some("location") => config.strategy = PositionStrategy::Location,
        Some(_) => config.strategy = PositionStrategy::BoundsCentroid,
        None => {}
    }
    match matches.get_one::<String>("layout").map(String::as_str) {
        Some("flat") => config.layout = TableLayout::Flat,
        Some(_) => config.layout = TableLayout::Nested,
        None => {}
    }

    let mode = if matches.get_flag("all") {
        SelectionMode::All
    } else {
        SelectionMode::Selected
    };

    let output = match matches.get_one::<String>("output") {
        Some(path) => PathBuf::from(path),
        None => output_path_from_env(&config.file_name)?,
    };

    let blend_path = matches
        .get_one::<String>("blend")
        .context("missing .blend file")?;
    let blend =
        Blend::from_path(blend_path).with_context(|| format!("could not parse {}", blend_path))?;
    info!("loaded {} (Blender {})", blend_path, blend.version());

    let scene = Scene::from_blend(&blend)?;
    let objects = scene.select(mode);
    info!("exporting {} objects ({:?})", objects.len(), mode);

    export::export(objects, &config, &output, io::stdout().lock())?;

    Ok(())
}

// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::value_parser;
use clap::Parser;

use heif_meta::container::HeifFile;
use heif_meta::mp4box::iprp::ImageSpatialExtents;
use heif_meta::mp4box::iprp::ItemProperty;
use heif_meta::mp4box::meta::MASTER_IMAGE;
use heif_meta::mp4box::meta::ROOT_CONTEXT;
use heif_meta::utils::fourcc_to_string;
use heif_meta::writer::config::*;
use heif_meta::writer::DerivedConfig;
use heif_meta::*;

use std::fs::File;
use std::io::Read;
use std::io::Write;

fn grid_parser(s: &str) -> Result<(u32, u32), String> {
    let values: Result<Vec<_>, _> = s.split('x').map(|x| x.parse::<u32>()).collect();
    match values.as_deref() {
        Ok([columns, rows]) => Ok((*columns, *rows)),
        _ => Err("Invalid grid string. Expecting <columns>x<rows>".into()),
    }
}

#[derive(Parser)]
struct CommandLineArgs {
    /// Print the items, references, properties and locations of the input file
    #[arg(long, default_value = "false")]
    info: bool,

    /// Write the payload of this item to the output file
    #[arg(long)]
    extract: Option<u32>,

    /// Add a grid image made of the master images of the input file, as <columns>x<rows>
    #[arg(long, value_parser = grid_parser)]
    grid: Option<(u32, u32)>,

    /// Add an identity image rotating each master image of the input file anti-clockwise by
    /// this many degrees
    #[arg(long, value_parser = value_parser!(u32).range(0..360))]
    rotate: Option<u32>,

    /// Input HEIF file
    #[arg(allow_hyphen_values = false)]
    input_file: String,

    /// Output file
    #[arg(short = 'o', long)]
    output_file: Option<String>,
}

fn validate_args(args: &CommandLineArgs) -> HeifResult<()> {
    let needs_output = args.extract.is_some() || args.grid.is_some() || args.rotate.is_some();
    if needs_output && args.output_file.is_none() {
        return Err(HeifError::PreconditionViolation(
            "an output file is required".into(),
        ));
    }
    if args.extract.is_some() && (args.grid.is_some() || args.rotate.is_some()) {
        return Err(HeifError::PreconditionViolation(
            "--extract cannot be combined with --grid or --rotate".into(),
        ));
    }
    Ok(())
}

fn print_data_as_columns(rows: &[(usize, &str, String)]) {
    let rows: Vec<_> = rows
        .iter()
        .filter(|x| !x.1.is_empty())
        .map(|x| (format!("{} * {}", " ".repeat(x.0 * 4), x.1), x.2.as_str()))
        .collect();

    // Calculate the maximum width for the first column.
    let mut max_col1_width = 0;
    for (col1, _) in &rows {
        max_col1_width = max_col1_width.max(col1.len());
    }

    for (col1, col2) in &rows {
        println!("{col1:<max_col1_width$} : {col2}");
    }
}

fn describe_property(property: &ItemProperty) -> String {
    match property {
        ItemProperty::ImageSpatialExtents(ispe) => format!("{}x{}", ispe.width, ispe.height),
        ItemProperty::ImageRotation(angle) => format!("{} degrees", u32::from(*angle) * 90),
        ItemProperty::RelativeLocation(rloc) => {
            format!("{},{}", rloc.horizontal_offset, rloc.vertical_offset)
        }
        ItemProperty::CleanAperture(clap) => format!("{clap:?}"),
        ItemProperty::Unknown { payload, .. } => format!("{} bytes", payload.len()),
    }
}

fn info(file: &HeifFile) -> HeifResult<()> {
    let meta = &file.meta;
    let mut rows: Vec<(usize, &str, String)> = vec![
        (0, "Brands", {
            let mut brands = vec![file.ftyp.major_brand.clone()];
            brands.extend(file.ftyp.compatible_brands.iter().cloned());
            brands.join(", ")
        }),
        (0, "Handler", meta.handler_type.clone()),
        (
            0,
            "Primary item",
            meta.primary_item_id
                .map_or("Absent".into(), |id| id.to_string()),
        ),
        (
            0,
            "Item locations",
            format!(
                "version {}, {:?}",
                meta.iloc.version(),
                meta.iloc.sizes()
            ),
        ),
        (0, "Media data", format!("{} bytes", file.mdat.len())),
    ];
    for entry in meta.iinf.entries() {
        let item_id = entry.item_id;
        rows.push((0, "Item", format!("{item_id} '{}'", entry.item_type)));
        if !entry.item_name.is_empty() {
            rows.push((1, "Name", entry.item_name.clone()));
        }
        rows.push((1, "Hidden", entry.hidden.to_string()));
        rows.push((1, "Master", meta.is_master(item_id).to_string()));
        for reference in meta.iref.references() {
            if reference.from_item_id == item_id {
                rows.push((
                    1,
                    "Reference",
                    format!("'{}' to {:?}", reference.reference_type, reference.to_item_ids),
                ));
            }
        }
        for (property, essential) in meta.iprp.properties_for(item_id)? {
            rows.push((
                1,
                "Property",
                format!(
                    "'{}'{} {}",
                    property.box_type(),
                    if essential { " (essential)" } else { "" },
                    describe_property(property)
                ),
            ));
        }
        match u16::try_from(item_id) {
            Ok(id) => match meta.iloc.item_location_for_id(id) {
                Ok(location) => rows.push((
                    1,
                    "Location",
                    format!(
                        "{:?}, {} extent(s), {} bytes",
                        location.construction_method,
                        location.extent_count(),
                        location.total_length()?
                    ),
                )),
                Err(_) => rows.push((1, "Location", "Absent".into())),
            },
            Err(_) => rows.push((1, "Location", "Absent".into())),
        }
    }
    print_data_as_columns(&rows);
    Ok(())
}

fn grid_output_size(tile: &ImageSpatialExtents, columns: u32, rows: u32) -> HeifResult<(u32, u32)> {
    match (tile.width.checked_mul(columns), tile.height.checked_mul(rows)) {
        (Some(width), Some(height)) => Ok((width, height)),
        _ => Err(HeifError::PreconditionViolation(format!(
            "a {columns}x{rows} grid of {}x{} tiles is too large",
            tile.width, tile.height
        ))),
    }
}

fn derive(file: &mut HeifFile, args: &CommandLineArgs) -> HeifResult<()> {
    let masters = file.meta.item_ids_by_type(ROOT_CONTEXT, MASTER_IMAGE)?;
    let context = file.meta.context_item_ids(ROOT_CONTEXT)?;
    // 1-based positions of the master images within the root context.
    let index_list: Vec<u32> = context
        .iter()
        .enumerate()
        .filter(|(_, item_id)| masters.contains(item_id))
        .map(|(index, _)| index as u32 + 1)
        .collect();
    let mut next_uniq_bsid = file.meta.contexts().keys().max().map_or(1, |x| x + 1);
    let mut config = DerivedConfig::default();
    if let Some((columns, rows)) = args.grid {
        let tile = file
            .meta
            .iprp
            .spatial_extents(masters.first().copied().ok_or(HeifError::NotFound)?)?;
        let (output_width, output_height) = grid_output_size(&tile, columns, rows)?;
        config.grids.push(GridConfig {
            uniq_bsid: next_uniq_bsid,
            refs_list: vec![ROOT_CONTEXT; index_list.len()],
            index_list: index_list.clone(),
            rows,
            columns,
            output_width,
            output_height,
        });
        next_uniq_bsid += 1;
    }
    if let Some(angle) = args.rotate {
        config.identities.push(IdentityConfig {
            uniq_bsid: next_uniq_bsid,
            refs_list: vec![ROOT_CONTEXT; index_list.len()],
            index_list,
            transforms: vec![Transform {
                property: TransformProperty::Rotation { angle },
                essential: true,
            }],
        });
    }
    let derivations = file.add_derived_images(&config)?;
    for (uniq_bsid, derivation) in &derivations {
        println!(
            "context {uniq_bsid}: '{}' items {:?} from {:?}",
            derivation.derivation_type.item_type(),
            derivation.item_ids,
            derivation.reference_item_ids
        );
    }
    Ok(())
}

fn run(args: &CommandLineArgs) -> HeifResult<()> {
    let mut data: Vec<u8> = Vec::new();
    File::open(&args.input_file)
        .and_then(|mut f| f.read_to_end(&mut data))
        .map_err(|err| HeifError::UnknownError(format!("cannot read input: {err}")))?;
    let mut file = HeifFile::parse(&data)?;
    log::info!(
        "parsed {} with major brand {}",
        args.input_file,
        fourcc_to_string(file.ftyp.major_brand.as_bytes())
    );
    if args.info {
        info(&file)?;
    }
    let output = if let Some(item_id) = args.extract {
        file.item_data_with_decoder_config(item_id)?
    } else if args.grid.is_some() || args.rotate.is_some() {
        derive(&mut file, args)?;
        file.write()?
    } else {
        return Ok(());
    };
    let Some(output_file) = &args.output_file else {
        return Ok(());
    };
    File::create(output_file)
        .and_then(|mut f| f.write_all(&output))
        .map_err(|err| HeifError::UnknownError(format!("cannot write output: {err}")))?;
    println!("wrote {} bytes to {output_file}", output.len());
    Ok(())
}

fn main() {
    env_logger::init();
    let args = CommandLineArgs::parse();
    if let Err(err) = validate_args(&args) {
        eprintln!("ERROR: {:#?}", err);
        std::process::exit(1);
    }
    match run(&args) {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            eprintln!("ERROR: {:#?}", err);
            std::process::exit(1);
        }
    }
}

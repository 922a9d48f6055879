use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use ndarray::{stack, Array1, Array2, Axis};

use calcium_core::io::image_export::save_image;
use calcium_core::io::npy_writer::write_npy;
use calcium_core::keys::ActivityKey;
use calcium_core::params::ExtractionMethod;

use super::{open_context, CurationArgs};

#[derive(Args)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub command: ExportCommand,
}

#[derive(Subcommand)]
pub enum ExportCommand {
    /// Per-mask traces as a (masks, frames) .npy, rows in mask id order
    Traces(TraceExportArgs),
    /// Rigid shifts as a (axes, planes, frames) .npy with axes y, x, z
    Shifts(ShiftExportArgs),
    /// One summary image of one field as TIFF or PNG
    Image(ImageExportArgs),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TraceKind {
    Fluorescence,
    Neuropil,
    Activity,
}

#[derive(Args)]
pub struct TraceExportArgs {
    #[command(flatten)]
    pub curation: CurationArgs,

    #[arg(long, value_enum, default_value = "fluorescence")]
    pub kind: TraceKind,

    /// Extraction method for activity traces
    #[arg(long)]
    pub method: Option<ExtractionMethod>,

    #[arg(long, default_value = "0")]
    pub channel: u32,

    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct ShiftExportArgs {
    #[command(flatten)]
    pub curation: CurationArgs,

    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ImageKind {
    Reference,
    Average,
    Correlation,
    Max,
}

#[derive(Args)]
pub struct ImageExportArgs {
    #[command(flatten)]
    pub curation: CurationArgs,

    #[arg(long, default_value = "0")]
    pub field: usize,

    #[arg(long, value_enum, default_value = "average")]
    pub kind: ImageKind,

    /// Output image; the extension selects TIFF or PNG
    #[arg(short, long)]
    pub output: PathBuf,
}

pub fn run(args: &ExportArgs, config_path: &Path) -> Result<()> {
    match &args.command {
        ExportCommand::Traces(traces) => export_traces(traces, config_path),
        ExportCommand::Shifts(shifts) => export_shifts(shifts, config_path),
        ExportCommand::Image(image) => export_image(image, config_path),
    }
}

fn export_traces(args: &TraceExportArgs, config_path: &Path) -> Result<()> {
    let (_, ctx) = open_context(config_path)?;
    let key = args.curation.key();

    let rows: Vec<Array1<f32>> = match args.kind {
        TraceKind::Fluorescence | TraceKind::Neuropil => {
            let record = ctx
                .catalog
                .fluorescence(&key)?
                .with_context(|| format!("No fluorescence for {key}"))?;
            record
                .traces
                .into_iter()
                .filter(|t| t.channel == args.channel)
                .map(|t| match args.kind {
                    TraceKind::Neuropil => t
                        .neuropil
                        .with_context(|| format!("Mask {} has no neuropil trace", t.mask_id)),
                    _ => Ok(t.fluorescence),
                })
                .collect::<Result<_>>()?
        }
        TraceKind::Activity => {
            let Some(method) = args.method else {
                bail!("--method is required for activity traces");
            };
            let activity_key = ActivityKey {
                curation: key,
                method,
            };
            let record = ctx
                .catalog
                .activity(&activity_key)?
                .with_context(|| format!("No activity for {activity_key}"))?;
            record
                .traces
                .into_iter()
                .filter(|t| t.channel == args.channel)
                .map(|t| t.activity)
                .collect()
        }
    };

    let matrix = stack_rows(&rows)?;
    write_npy(&args.output, &matrix)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!(
        "Wrote {} x {} traces to {}",
        matrix.nrows(),
        matrix.ncols(),
        args.output.display()
    );
    Ok(())
}

fn stack_rows(rows: &[Array1<f32>]) -> Result<Array2<f32>> {
    if rows.is_empty() {
        bail!("No traces on the requested channel");
    }
    let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

fn export_shifts(args: &ShiftExportArgs, config_path: &Path) -> Result<()> {
    let (_, ctx) = open_context(config_path)?;
    let key = args.curation.key();
    let record = ctx
        .catalog
        .motion_correction(&key)?
        .with_context(|| format!("No motion correction for {key}"))?;
    let rigid = record
        .rigid
        .with_context(|| format!("{key} has no rigid shifts"))?;

    let shifts = stack(
        Axis(0),
        &[rigid.y_shifts.view(), rigid.x_shifts.view(), rigid.z_shifts.view()],
    )?;
    write_npy(&args.output, &shifts)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("Wrote shifts {:?} to {}", shifts.dim(), args.output.display());
    Ok(())
}

fn export_image(args: &ImageExportArgs, config_path: &Path) -> Result<()> {
    let (_, ctx) = open_context(config_path)?;
    let key = args.curation.key();
    let record = ctx
        .catalog
        .motion_correction(&key)?
        .with_context(|| format!("No motion correction for {key}"))?;
    let images = record
        .summary_images
        .into_iter()
        .find(|s| s.field_idx == args.field)
        .with_context(|| format!("{key} has no field {}", args.field))?;

    let image = match args.kind {
        ImageKind::Reference => Some(images.reference),
        ImageKind::Average => Some(images.average),
        ImageKind::Correlation => images.correlation,
        ImageKind::Max => images.max_projection,
    }
    .context("Requested summary image was not produced by this backend")?;

    save_image(&image, &args.output)
        .with_context(|| format!("Failed to save {}", args.output.display()))?;
    println!("Image saved to {}", args.output.display());
    Ok(())
}

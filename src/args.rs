use clap::{Args, Subcommand};
use cool_routes::pipelines::{Product, RunOptions};
use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[clap(author, version, about)]
pub struct CoolRoutesArgs {
    #[clap(subcommand)]
    pub subcmd: Subaction,
}

#[derive(Debug, Subcommand)]
pub enum Subaction {
    /// exports the mean NDVI of cloud masked Sentinel-2 scenes over the region
    Ndvi(PipelineCommand),

    /// exports a land surface temperature composite from Landsat 8 scenes
    Lst(PipelineCommand),

    /// exports the mean building height of every footprint in the region
    Buildings(PipelineCommand),

    /// prints the query and transforms a pipeline would run, as json
    Plan(PlanCommand),

    /// downloads exported files from a Google Drive folder
    SyncDrive(SyncCommand),
}

#[derive(Debug, Args)]
pub struct PipelineCommand {
    /// the pipeline configuration file
    #[clap(short, long)]
    pub config: PathBuf,

    /// slug of a region file in the regions directory, overrides the config's region
    #[clap(short, long)]
    pub region: Option<String>,

    /// the directory holding <slug>.yaml region files
    #[clap(long, default_value = "config/regions")]
    pub regions_dir: PathBuf,

    /// skip geocoding and use the fallback polygon
    #[clap(long)]
    pub offline: bool,
}

impl PipelineCommand {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            config: self.config.clone(),
            region: self.region.clone(),
            regions_dir: self.regions_dir.clone(),
            offline: self.offline,
        }
    }
}

#[derive(Debug, Args)]
pub struct PlanCommand {
    /// the pipeline to plan
    #[clap(short, long, value_enum)]
    pub product: Product,

    #[clap(flatten)]
    pub pipeline: PipelineCommand,
}

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// the sync configuration file
    #[clap(short, long)]
    pub config: PathBuf,
}

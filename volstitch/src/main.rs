use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use volstitch::{load_tiff_volume, save_tiff_volume, StitchInputs, StitchJob, Stitcher, Volume};

const USAGE: &str = "usage: volstitch <job.yaml|job.json> [log-level]";

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let job_path = args.next().context(USAGE)?;
    let level = args.next().unwrap_or_else(|| "info".to_string());

    common::log_setup::setup_logging(&level, "volstitch");

    let job = StitchJob::load(&job_path)
        .with_context(|| format!("Failed to load job file '{job_path}'"))?;
    info!(job = %job_path, "Loaded job");

    let spacing = job.spacing();
    let load = |path: &Path| -> Result<Volume> {
        let volume = load_tiff_volume(path)
            .with_context(|| format!("Failed to load volume '{}'", path.display()))?;
        Ok(volume.with_spacing(spacing))
    };

    let mut inputs = StitchInputs::new(load(&job.front)?, load(&job.back)?);
    if let (Some(gf), Some(gb)) = (&job.guide_front, &job.guide_back) {
        inputs = inputs.with_guide(load(gf)?, load(gb)?);
    }
    for channel in &job.channels {
        inputs = inputs.with_channel(load(&channel.front)?, load(&channel.back)?);
    }

    let stitcher = Stitcher::new(job.config.clone()).context("Invalid run configuration")?;
    let output = stitcher.run(inputs).context("Stitching failed")?;

    save_tiff_volume(&output.fused, &job.output)
        .with_context(|| format!("Failed to save '{}'", job.output.display()))?;
    for (volume, channel) in output.channels.iter().zip(&job.channels) {
        save_tiff_volume(volume, &channel.output)
            .with_context(|| format!("Failed to save '{}'", channel.output.display()))?;
    }
    if let Some(path) = &job.diagnostics {
        output
            .diagnostics
            .save(path)
            .with_context(|| format!("Failed to write diagnostics '{}'", path.display()))?;
    }

    info!(
        overlap = output.overlap,
        output = %job.output.display(),
        "Done in {:.2}s",
        output.diagnostics.duration_secs
    );
    Ok(())
}

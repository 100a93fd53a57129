use log::info;
use std::path::Path;

use crate::compression::CompressionOptions;
use crate::environment::{MediaEnvironment, AVIERR_OK, AVIERR_USERABORT};
use crate::error::{AviError, Result};
use crate::stream::StreamCore;

/// Lets the caller pick compression options before an export, e.g. from a
/// codec dialog. Returning `None` cancels the export.
pub trait CompressionPrompt {
    fn choose(&mut self, proposed: &CompressionOptions) -> Option<CompressionOptions>;
}

impl<F> CompressionPrompt for F
where
    F: FnMut(&CompressionOptions) -> Option<CompressionOptions>,
{
    fn choose(&mut self, proposed: &CompressionOptions) -> Option<CompressionOptions> {
        self(proposed)
    }
}

/// Supplied options win, then the ones recorded on the stream, then plain DIB.
fn resolve_options(core: &StreamCore, options: Option<CompressionOptions>) -> CompressionOptions {
    options
        .or_else(|| core.compression.clone())
        .unwrap_or_else(CompressionOptions::uncompressed)
}

pub(crate) fn export<E: MediaEnvironment>(
    env: &mut E,
    core: &mut StreamCore,
    path: &Path,
    options: Option<CompressionOptions>,
) -> Result<()> {
    let options = resolve_options(core, options);
    save(env, core, path, options)
}

pub(crate) fn export_with_prompt<E: MediaEnvironment, P: CompressionPrompt + ?Sized>(
    env: &mut E,
    core: &mut StreamCore,
    path: &Path,
    prompt: &mut P,
) -> Result<()> {
    let proposed = resolve_options(core, None);
    let options = prompt.choose(&proposed).ok_or(AviError::ExportFailed {
        status: AVIERR_USERABORT,
    })?;
    save(env, core, path, options)
}

fn save<E: MediaEnvironment>(
    env: &mut E,
    core: &mut StreamCore,
    path: &Path,
    options: CompressionOptions,
) -> Result<()> {
    core.compression = Some(options.clone());

    let status = env.save(path, &[core.raw], std::slice::from_ref(&options));
    if status != AVIERR_OK {
        return Err(AviError::ExportFailed { status });
    }

    info!(
        "Exported {} frames to {} ({})",
        core.state.descriptor.frame_count,
        path.display(),
        options.fcc_handler
    );
    Ok(())
}

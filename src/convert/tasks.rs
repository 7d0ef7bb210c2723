use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Converter, Download, DownloadOptions, Gateway};
use crate::config::Config;
use crate::db::{Store, Submission};

/// Runs a submission conversion in the background so the request that asked
/// for it does not wait on the converter.
pub fn spawn_submission_conversion(
    config: Arc<Config>,
    store: Arc<dyn Store>,
    converter: Arc<dyn Converter>,
    submission: Submission,
    format: String,
    force: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let gateway = Gateway::new(&config, store.as_ref(), converter.as_ref());
        let opts = DownloadOptions {
            force,
            offline: true,
        };
        let ident = submission.file_identifier();

        match gateway.download_submission(&submission, &format, opts).await {
            Ok(Download::Prepared(path)) => info!(
                "Background conversion of {} v{} to {} ready at {}",
                ident,
                submission.version,
                format,
                path.display()
            ),
            Ok(Download::Degraded { .. }) => warn!(
                "Background conversion of {} v{} to {} was rejected by the converter",
                ident, submission.version, format
            ),
            Ok(other) => warn!(
                "Background conversion of {} v{} to {} produced no file: {:?}",
                ident, submission.version, format, other
            ),
            Err(e) => error!(
                "Background conversion of {} v{} to {} failed: {}",
                ident, submission.version, format, e
            ),
        }
    })
}

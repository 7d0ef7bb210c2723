use std::path::Path;

use tracing::{error, info, warn};

use super::has_manifest;
use crate::convert::{ConversionInput, ConversionOptions, Converter};
use crate::storage;

/// Converts a legacy `.oldhepdata` file into a manifest directory under
/// `output_dir`. Rejections and crashes of the converter both yield `false`.
pub async fn convert_legacy(
    converter: &dyn Converter,
    legacy_file: &Path,
    output_dir: &Path,
) -> bool {
    let options = ConversionOptions::new("oldhepdata", "yaml");
    let input = ConversionInput::File(legacy_file.to_path_buf());

    let conversion = match converter.convert(&input, &options).await {
        Ok(conversion) => conversion,
        Err(e) => {
            error!("Legacy conversion of {} failed: {}", legacy_file.display(), e);
            return false;
        }
    };

    if !conversion.success {
        warn!("Converter rejected {}", legacy_file.display());
        return false;
    }

    if let Err(e) = storage::extract_zip_bytes(&conversion.payload, output_dir) {
        warn!("Converter output for {} is unreadable: {}", legacy_file.display(), e);
        return false;
    }

    let converted = has_manifest(output_dir);
    info!(
        "Legacy conversion of {} finished, manifest present: {}",
        legacy_file.display(),
        converted
    );
    converted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{Conversion, ConvertError};
    use async_trait::async_trait;

    struct Canned(Result<Conversion, ()>);

    #[async_trait]
    impl Converter for Canned {
        async fn convert(
            &self,
            _input: &ConversionInput,
            options: &ConversionOptions,
        ) -> Result<Conversion, ConvertError> {
            assert_eq!(options.input_format, "oldhepdata");
            assert_eq!(options.output_format, "yaml");
            self.0.clone().map_err(|_| {
                ConvertError::Io(std::io::Error::new(std::io::ErrorKind::Other, "crashed"))
            })
        }
    }

    fn zipped_manifest() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("submission.yaml"), "---\nname: Table 1\n").unwrap();
        storage::zip_directory(dir.path()).unwrap()
    }

    #[tokio::test]
    async fn success_requires_a_manifest() {
        let root = tempfile::tempdir().unwrap();
        let legacy = root.path().join("data.oldhepdata");
        std::fs::write(&legacy, "*dataset:").unwrap();

        let ok = Canned(Ok(Conversion {
            success: true,
            payload: zipped_manifest(),
        }));
        assert!(convert_legacy(&ok, &legacy, &root.path().join("out")).await);

        let empty_dir = tempfile::tempdir().unwrap();
        let empty = Canned(Ok(Conversion {
            success: true,
            payload: storage::zip_directory(empty_dir.path()).unwrap(),
        }));
        assert!(!convert_legacy(&empty, &legacy, &root.path().join("out2")).await);
    }

    #[tokio::test]
    async fn rejections_and_crashes_fold_to_false() {
        let root = tempfile::tempdir().unwrap();
        let legacy = root.path().join("data.oldhepdata");
        std::fs::write(&legacy, "*dataset:").unwrap();

        let rejected = Canned(Ok(Conversion {
            success: false,
            payload: b"<html>bad input</html>".to_vec(),
        }));
        assert!(!convert_legacy(&rejected, &legacy, &root.path().join("a")).await);

        let crashed = Canned(Err(()));
        assert!(!convert_legacy(&crashed, &legacy, &root.path().join("b")).await);
    }
}

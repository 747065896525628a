pub mod xz;

use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddDebugObjectAndFnName;
use derive_more::From;
use io_enum::Write;
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::result;
use validator::{Validate, ValidationErrors};

#[derive(Write, From)]
pub enum Compressor<W: Write> {
    None(W),
    XzEncoder(XzEncoder<W>),
}

/// Compression applied to the tar stream of an archive artifact.
#[derive(Clone, From, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "Type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CompressorConfig {
    None,
    Xz(xz::XzConfig),
}

impl Default for CompressorConfig {
    fn default() -> Self {
        CompressorConfig::Xz(xz::XzConfig::default())
    }
}

impl Validate for CompressorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            CompressorConfig::None => Ok(()),
            CompressorConfig::Xz(xz) => xz.validate(),
        }
    }
}

pub trait CompressorBuilder<W: Write> {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>>;
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::XzEncoder(w) => w.finish(),
        }
    }
}

impl<W: Write> CompressorBuilder<W> for CompressorConfig {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        match self {
            CompressorConfig::None => {
                tracing::debug!("Using no compression");
                Ok(Compressor::None(writer))
            }
            CompressorConfig::Xz(xz) => xz.build_compressor(writer),
        }
        .add_debug_object_and_fn_name(self.clone(), "build_compressor")
    }
}

impl FileExtProvider for CompressorConfig {
    fn file_ext(&self) -> Option<&'static str> {
        match self {
            CompressorConfig::None => None,
            CompressorConfig::Xz(_) => Some("xz"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_default_is_xz() {
        let config = CompressorConfig::default();
        assert_eq!(config.file_ext(), Some("xz"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_none_passes_bytes_through() {
        let mut compressor = CompressorConfig::None
            .build_compressor(Cursor::new(Vec::new()))
            .unwrap();
        compressor.write_all(b"plain").unwrap();
        let cursor = compressor.finish().unwrap();
        assert_eq!(cursor.into_inner(), b"plain");
        assert_eq!(CompressorConfig::None.file_ext(), None);
    }

    #[test]
    fn test_config_deserialization() {
        let config: CompressorConfig = serde_json::from_str(r#"{"Type":"none"}"#).unwrap();
        assert_eq!(config, CompressorConfig::None);

        let config: CompressorConfig =
            serde_json::from_str(r#"{"Type":"xz","Level":9,"Thread":1}"#).unwrap();
        assert!(matches!(config, CompressorConfig::Xz(_)));

        let unknown = serde_json::from_str::<CompressorConfig>(r#"{"Type":"zip"}"#);
        assert!(unknown.is_err());
    }
}

//! Compression codecs and payload size estimation.
//!
//! The benchmark never needs to decompress anything; it only needs to know
//! how many bytes a codec would put on the wire for a given sample. When the
//! transport cannot report that number, a [`SizeEstimator`] supplies it,
//! either from a fixed per-codec reduction factor ([`ModeledEstimator`]) or
//! by compressing the sample locally ([`MeasuredEstimator`]).

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Default zstd level, matching the broker client default.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Producer-side compression codecs
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    #[clap(name = "none")]
    None,
    #[clap(name = "snappy")]
    Snappy,
    #[clap(name = "lz4")]
    Lz4,
    #[clap(name = "zstd")]
    Zstd,
}

impl CompressionCodec {
    /// All codecs, in the order a compression sweep runs them by default
    pub const ALL: [CompressionCodec; 4] = [
        CompressionCodec::None,
        CompressionCodec::Snappy,
        CompressionCodec::Lz4,
        CompressionCodec::Zstd,
    ];

    /// Name as understood by the `compression.type` client property
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionCodec::None => "none",
            CompressionCodec::Snappy => "snappy",
            CompressionCodec::Lz4 => "lz4",
            CompressionCodec::Zstd => "zstd",
        }
    }

    /// Fixed fraction of the original size a codec is assumed to keep.
    pub fn modeled_factor(&self) -> f64 {
        match self {
            CompressionCodec::None => 1.0,
            CompressionCodec::Snappy => 0.40,
            CompressionCodec::Lz4 => 0.35,
            CompressionCodec::Zstd => 0.25,
        }
    }
}

impl std::fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a compressed size came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeSource {
    /// Fixed reduction factor; an approximation, not a measurement.
    Modeled,
    /// Sample compressed locally with the codec's reference implementation.
    Measured,
    /// Reported by the producer transport itself.
    Transport,
}

impl std::fmt::Display for SizeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeSource::Modeled => write!(f, "modeled"),
            SizeSource::Measured => write!(f, "measured"),
            SizeSource::Transport => write!(f, "transport"),
        }
    }
}

/// Compressed size of a sample together with its provenance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressedSize {
    pub bytes: u64,
    pub source: SizeSource,
}

/// Strategy for estimating how large a sample becomes under a codec
pub trait SizeEstimator: Send + Sync {
    fn estimate(&self, original: &[u8], codec: CompressionCodec) -> Result<CompressedSize>;

    fn name(&self) -> &'static str;
}

/// Applies [`CompressionCodec::modeled_factor`] to the original length.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModeledEstimator;

impl SizeEstimator for ModeledEstimator {
    fn estimate(&self, original: &[u8], codec: CompressionCodec) -> Result<CompressedSize> {
        let original_len = original.len() as u64;
        let bytes = match codec {
            CompressionCodec::None => original_len,
            other => (original_len as f64 * other.modeled_factor()).floor() as u64,
        };
        Ok(CompressedSize {
            bytes,
            source: SizeSource::Modeled,
        })
    }

    fn name(&self) -> &'static str {
        "modeled"
    }
}

/// Compresses the sample for real and reports the output length.
#[derive(Debug, Clone, Copy)]
pub struct MeasuredEstimator {
    pub zstd_level: i32,
}

impl Default for MeasuredEstimator {
    fn default() -> Self {
        Self {
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl SizeEstimator for MeasuredEstimator {
    fn estimate(&self, original: &[u8], codec: CompressionCodec) -> Result<CompressedSize> {
        let bytes = compress(original, codec, self.zstd_level)?.len() as u64;
        Ok(CompressedSize {
            bytes,
            source: SizeSource::Measured,
        })
    }

    fn name(&self) -> &'static str {
        "measured"
    }
}

/// Which estimator the run should use
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    Modeled,
    Measured,
}

impl EstimatorKind {
    pub fn build(&self) -> Box<dyn SizeEstimator> {
        match self {
            EstimatorKind::Modeled => Box::new(ModeledEstimator),
            EstimatorKind::Measured => Box::new(MeasuredEstimator::default()),
        }
    }
}

/// Compress `data` with `codec`.
pub fn compress(data: &[u8], codec: CompressionCodec, zstd_level: i32) -> Result<Vec<u8>> {
    match codec {
        CompressionCodec::None => Ok(data.to_vec()),
        CompressionCodec::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .context("snappy compression failed"),
        CompressionCodec::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionCodec::Zstd => {
            zstd::bulk::compress(data, zstd_level).context("zstd compression failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repetitive_sample() -> Vec<u8> {
        let line = br#"{"device_id":"HYDRO_DN_001","turbine_type":"kaplan","reserved":"paddingxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"}"#;
        line.iter().copied().cycle().take(line.len() * 200).collect()
    }

    #[test]
    fn test_modeled_factors() {
        let sample = vec![b'a'; 1000];
        let est = ModeledEstimator;
        assert_eq!(est.estimate(&sample, CompressionCodec::None).unwrap().bytes, 1000);
        assert_eq!(est.estimate(&sample, CompressionCodec::Snappy).unwrap().bytes, 400);
        assert_eq!(est.estimate(&sample, CompressionCodec::Lz4).unwrap().bytes, 350);
        assert_eq!(est.estimate(&sample, CompressionCodec::Zstd).unwrap().bytes, 250);
    }

    #[test]
    fn test_modeled_size_truncates() {
        // 999 * 0.35 = 349.65
        let sample = vec![0u8; 999];
        let size = ModeledEstimator
            .estimate(&sample, CompressionCodec::Lz4)
            .unwrap();
        assert_eq!(size.bytes, 349);
        assert_eq!(size.source, SizeSource::Modeled);
    }

    #[test]
    fn test_measured_estimator_shrinks_repetitive_data() {
        let sample = repetitive_sample();
        let est = MeasuredEstimator::default();
        for codec in [
            CompressionCodec::Snappy,
            CompressionCodec::Lz4,
            CompressionCodec::Zstd,
        ] {
            let size = est.estimate(&sample, codec).unwrap();
            assert_eq!(size.source, SizeSource::Measured);
            assert!(
                size.bytes < sample.len() as u64,
                "{} did not shrink the sample",
                codec
            );
        }
        assert_eq!(
            est.estimate(&sample, CompressionCodec::None).unwrap().bytes,
            sample.len() as u64
        );
    }

    #[test]
    fn test_codec_names() {
        let names: Vec<&str> = CompressionCodec::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["none", "snappy", "lz4", "zstd"]);
        assert_eq!(CompressionCodec::Zstd.to_string(), "zstd");
    }
}

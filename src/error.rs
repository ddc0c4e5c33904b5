//! Error-kind classification over the module error enums. Errors propagate
//! as [`anyhow::Error`] chains; hosts that need a coarse category (bad
//! query, broken file, unsupported feature) classify the chain here.

use pgen_io::PgenError;
use sidecar::{RegionError, SampleMetaError, VariantMetaError};

use crate::params::ParamError;

/// Coarse error categories surfaced to the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed parameters, malformed sidecars, schema mismatches.
    InvalidInput,
    /// File access, decode failures, allocation failures.
    Io,
    /// Recognized but unimplemented format features.
    NotImplemented,
}

impl ErrorKind {
    /// Classify an error chain by its innermost recognized cause.
    pub fn classify(err: &anyhow::Error) -> ErrorKind {
        let mut kind = ErrorKind::Io;
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<PgenError>() {
                kind = Self::of_pgen(e);
            } else if let Some(e) = cause.downcast_ref::<ParamError>() {
                kind = Self::of_param(e);
            } else if let Some(e) = cause.downcast_ref::<VariantMetaError>() {
                kind = Self::of_variant_meta(e);
            } else if let Some(e) = cause.downcast_ref::<SampleMetaError>() {
                kind = Self::of_sample_meta(e);
            } else if let Some(e) = cause.downcast_ref::<RegionError>() {
                kind = match e {
                    RegionError::Meta(inner) => Self::of_variant_meta(inner),
                    _ => ErrorKind::InvalidInput,
                };
            } else if cause.downcast_ref::<std::io::Error>().is_some() {
                kind = ErrorKind::Io;
            } else {
                continue;
            }
        }
        kind
    }

    fn of_pgen(err: &PgenError) -> ErrorKind {
        match err {
            PgenError::Open{..}
            | PgenError::RecordRead{..}
            | PgenError::GeometryMismatch{..}
            | PgenError::TruncatedHeader{..}
            | PgenError::TruncatedRecord{..}
            | PgenError::Alloc{..} => ErrorKind::Io,
            PgenError::UnsupportedMode{..}
            | PgenError::UnsupportedVrtype{..}
            | PgenError::NotImplemented{..} => ErrorKind::NotImplemented,
            PgenError::BadMagic{..}
            | PgenError::MissingCountHints{..}
            | PgenError::VariantOutOfRange{..}
            | PgenError::SampleOutOfRange{..}
            | PgenError::UnsortedSubset{..}
            | PgenError::SubsetMismatch{..} => ErrorKind::InvalidInput,
        }
    }

    fn of_param(err: &ParamError) -> ErrorKind {
        match err {
            ParamError::DosageNotImplemented => ErrorKind::NotImplemented,
            _ => ErrorKind::InvalidInput,
        }
    }

    fn of_variant_meta(err: &VariantMetaError) -> ErrorKind {
        match err {
            VariantMetaError::Open{..} => ErrorKind::Io,
            _ => ErrorKind::InvalidInput,
        }
    }

    fn of_sample_meta(err: &SampleMetaError) -> ErrorKind {
        match err {
            SampleMetaError::Open{..} => ErrorKind::Io,
            _ => ErrorKind::InvalidInput,
        }
    }
}

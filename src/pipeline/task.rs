use crate::buffer::params::BufferParams;
use crate::crs::resolve::CrsTriple;
use crate::geofile::feature::Feature;

/// Everything one feature needs in order to be processed, owned. Tasks share
/// no mutable state: the CRS strings and buffer parameters are copied into
/// each task, so no worker ever reads a structure another task writes.
#[derive(Debug, Clone)]
pub struct FeatureTask {
    pub feature: Feature,
    pub src_crs: String,
    pub buf_crs: String,
    pub dst_crs: String,
    pub skip_failures: bool,
    pub params: BufferParams,
}

/// Builds one task per input feature from the run-wide configuration.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    crs: CrsTriple,
    params: BufferParams,
    skip_failures: bool,
}

impl TaskBuilder {
    pub fn new(crs: CrsTriple, params: BufferParams, skip_failures: bool) -> Self {
        Self {
            crs,
            params,
            skip_failures,
        }
    }

    pub fn build(&self, feature: Feature) -> FeatureTask {
        FeatureTask {
            feature,
            src_crs: self.crs.source.clone(),
            buf_crs: self.crs.buffer.clone(),
            dst_crs: self.crs.destination.clone(),
            skip_failures: self.skip_failures,
            params: self.params.clone(),
        }
    }
}

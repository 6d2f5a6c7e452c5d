pub mod deploy;
pub mod plan;

use moor_config::DeploySpec;
use moor_deploy::TailscaleMesh;

use crate::args::{AccessArg, SpecArgs};
use crate::error::Result;

pub(crate) fn resolve_spec(args: &SpecArgs) -> Result<DeploySpec> {
    let raw = args.to_raw();
    let spec = if matches!(args.access, AccessArg::Mesh) {
        moor_config::resolve_with_mesh(raw, &TailscaleMesh)?
    } else {
        moor_config::resolve(raw)?
    };
    Ok(spec)
}

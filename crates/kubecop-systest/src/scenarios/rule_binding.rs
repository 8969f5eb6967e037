//! The rule-binding CRD accepts valid bindings and rejects malformed ones
//!
//! Bindings are applied and deleted unconditionally. A binding left behind
//! by an earlier run is overwritten and then removed, never adopted.

use tracing::{debug, info, warn};

use kubecop_cluster::ObjectRef;
use kubecop_common::kube_utils::read_manifests;
use kubecop_common::{Error, Result};

use crate::context::ScenarioContext;

/// Directory holding the rule-binding manifests
pub const BINDINGS_DIR: &str = "rule_binding_crds_files";

/// Bindings are cluster-scoped; this only fills the reference's namespace
const DEFAULT_NAMESPACE: &str = "default";

/// A binding referencing rules by valid name, id and tag
pub const VALID_BINDING: &str = "all-valid.yaml";

/// Bindings the API server must refuse, with what makes each invalid
pub const INVALID_BINDINGS: &[(&str, &str)] = &[
    ("invalid-name.yaml", "Invalid name"),
    ("invalid-id.yaml", "Invalid id"),
    ("invalid-tag.yaml", "Invalid tag"),
    ("dup-fields-name-tag.yaml", "Duplicate fields name-tag"),
    ("dup-fields-name-id.yaml", "Duplicate fields name-id"),
    ("dup-fields-id-tag.yaml", "Duplicate fields id-tag"),
];

/// Apply and remove the valid binding, then expect every invalid one to be rejected
pub async fn run(ctx: &ScenarioContext) -> Result<()> {
    let scope = ctx.resources();
    scope
        .guard(async {
            let valid = apply_binding(ctx, VALID_BINDING).await?;
            for object in valid.iter().rev() {
                ctx.cluster().delete_object(object).await?;
            }
            info!("Valid rule binding applied and deleted");

            for (file, case) in INVALID_BINDINGS {
                match apply_binding(ctx, file).await {
                    Ok(accepted) => {
                        for object in accepted {
                            scope.track_object(object);
                        }
                        return Err(Error::expectation(format!(
                            "{case} test failed: {file} was accepted"
                        )));
                    }
                    Err(Error::Resource { message, .. }) => {
                        debug!(binding = %file, reason = %message, "Rejected as expected");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
        .await
}

/// Apply every document of a binding file.
///
/// When a document is refused, the ones applied before it are deleted and the
/// refusal is returned.
async fn apply_binding(ctx: &ScenarioContext, file: &str) -> Result<Vec<ObjectRef>> {
    let path = ctx.resource_path(&format!("{BINDINGS_DIR}/{file}"));
    let docs = read_manifests(&path)?;

    let mut applied = Vec::with_capacity(docs.len());
    for doc in &docs {
        let object = ObjectRef::from_manifest(doc, Some(DEFAULT_NAMESPACE))?;
        if let Err(e) = ctx.cluster().apply_object(&object, doc).await {
            for earlier in applied.iter().rev() {
                if let Err(cleanup) = ctx.cluster().delete_object(earlier).await {
                    warn!(object = %earlier, error = %cleanup, "Failed to remove partial binding");
                }
            }
            return Err(e);
        }
        applied.push(object);
    }
    Ok(applied)
}

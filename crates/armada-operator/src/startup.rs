//! Work done once before the controllers start

use armada_common::crd::all_crds;
use armada_common::retry::{retry_with_backoff, RetryConfig};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::info;

/// Attempts made to install the CRDs before giving up
const CRD_INSTALL_ATTEMPTS: u32 = 10;

/// Install or update every Armada CRD with server-side apply.
///
/// The operator owns its CRDs, so their schema always matches the binary.
pub async fn ensure_crds_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();
    let retry = RetryConfig::with_max_attempts(CRD_INSTALL_ATTEMPTS);

    for crd in all_crds() {
        let name = crd.name_any();
        info!(crd = %name, "Installing CRD");
        retry_with_backoff(&retry, "install_crd", || {
            let crds = crds.clone();
            let params = params.clone();
            let crd = crd.clone();
            let name = name.clone();
            async move { crds.patch(&name, &params, &Patch::Apply(&crd)).await }
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install CRD {name}: {e}"))?;
    }

    info!("All Armada CRDs installed/updated");
    Ok(())
}

/// All CRDs as one multi-document YAML stream
pub fn crds_yaml() -> anyhow::Result<String> {
    let mut out = String::new();
    for crd in all_crds() {
        let doc = serde_yaml::to_string(&crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {e}"))?;
        out.push_str("---\n");
        out.push_str(&doc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_stream_holds_every_kind() {
        let yaml = crds_yaml().unwrap();

        let docs: Vec<CustomResourceDefinition> = yaml
            .split("---\n")
            .filter(|d| !d.trim().is_empty())
            .map(|d| serde_yaml::from_str(d).unwrap())
            .collect();

        let names: Vec<String> = docs.iter().map(|d| d.name_any()).collect();
        assert_eq!(
            names,
            vec![
                "armadacharts.armada.airshipit.org",
                "armadachartgroups.armada.airshipit.org",
                "armadamanifests.armada.airshipit.org",
            ]
        );
    }
}

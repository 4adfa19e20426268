//! CRD printing and installation
//!
//! CRDs are grouped per controller set so an embedder running only the
//! certificate controllers installs only what those need.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use converge_common::crd::{
    Backup, BackupScheduled, Certificate, CertificateRequest, DataSync, Image, ImageScheduled,
    Restore,
};

/// Field manager used when applying CRDs
const CRD_FIELD_MANAGER: &str = "converge-operator";

/// CRD definition with name and resource
pub struct CrdDef {
    /// Full CRD name (`<plural>.<group>`)
    pub name: String,
    /// Generated definition
    pub crd: CustomResourceDefinition,
}

impl CrdDef {
    fn of<K: CustomResourceExt>() -> Self {
        Self {
            name: K::crd_name().to_string(),
            crd: K::crd(),
        }
    }
}

/// CRDs served by the backup controllers
pub fn backup_crds() -> Vec<CrdDef> {
    vec![
        CrdDef::of::<Backup>(),
        CrdDef::of::<BackupScheduled>(),
        CrdDef::of::<Image>(),
        CrdDef::of::<ImageScheduled>(),
        CrdDef::of::<Restore>(),
        CrdDef::of::<DataSync>(),
    ]
}

/// CRDs served by the certificate controllers
pub fn certificate_crds() -> Vec<CrdDef> {
    vec![
        CrdDef::of::<Certificate>(),
        CrdDef::of::<CertificateRequest>(),
    ]
}

/// Render CRDs as a multi-document YAML stream
pub fn print_crds(crds: &[CrdDef]) -> anyhow::Result<String> {
    let mut out = String::new();
    for def in crds {
        let yaml = serde_yaml::to_string(&def.crd)
            .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

/// Install a set of CRDs using server-side apply
pub async fn ensure_crds(client: &Client, crds_to_install: Vec<CrdDef>) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CRD_FIELD_MANAGER).force();

    for def in crds_to_install {
        tracing::info!(crd = %def.name, "installing CRD");
        crds.patch(&def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("CRDs installed/updated");
    Ok(())
}

//! [`ManagedFields`] adapters for the kinds the controllers create
//!
//! Custom resources own their whole spec. Jobs own only their managed
//! metadata, since a Job's pod template cannot change after creation.

use k8s_openapi::api::batch::v1::Job;

use converge_common::crd::{
    Backup, BackupSpec, CertificateRequest, CertificateRequestSpec, Image, ImageSpec, Restore,
    RestoreSpec,
};

use crate::sync::{ManagedFields, ManagedMetadata};

macro_rules! spec_adapter {
    ($kind:ty, $spec:ty) => {
        impl ManagedFields for $kind {
            type Managed = (ManagedMetadata, $spec);

            fn managed(&self) -> Self::Managed {
                (ManagedMetadata::from_meta(&self.metadata), self.spec.clone())
            }

            fn apply_managed(&mut self, (meta, spec): Self::Managed) {
                meta.apply_to(&mut self.metadata);
                self.spec = spec;
            }
        }
    };
}

spec_adapter!(Backup, BackupSpec);
spec_adapter!(Image, ImageSpec);
spec_adapter!(Restore, RestoreSpec);
spec_adapter!(CertificateRequest, CertificateRequestSpec);

impl ManagedFields for Job {
    type Managed = ManagedMetadata;

    fn managed(&self) -> Self::Managed {
        ManagedMetadata::from_meta(&self.metadata)
    }

    fn apply_managed(&mut self, meta: Self::Managed) {
        meta.apply_to(&mut self.metadata);
    }
}

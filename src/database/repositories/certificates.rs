//! Certificate stores: installed CA certificates and the charge point's
//! own certificate lifecycle.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{debug, warn};

use crate::database::entities::{ca_certificate, cp_certificate};
use crate::support::errors::ChargePointResult;
use crate::types::{CertificateHashData, CertificateUse, HashAlgorithm};

fn hash_data_of(row: &ca_certificate::Model) -> CertificateHashData {
    CertificateHashData {
        hash_algorithm: row
            .hash_algorithm
            .parse()
            .unwrap_or(HashAlgorithm::SHA256),
        issuer_name_hash: row.issuer_name_hash.clone(),
        issuer_key_hash: row.issuer_key_hash.clone(),
        serial_number: row.serial_number.clone(),
    }
}

// ── CA certificates ────────────────────────────────────────────

#[derive(Clone)]
pub struct CaCertificateRepository {
    db: DatabaseConnection,
}

/// Outcome of a CA certificate deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaDeleteOutcome {
    Deleted,
    NotFound,
    InUse,
}

impl CaCertificateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn install(
        &self,
        certificate_use: CertificateUse,
        hash_data: &CertificateHashData,
        certificate_pem: &str,
    ) -> ChargePointResult<()> {
        debug!(
            serial = hash_data.serial_number.as_str(),
            "Installing CA certificate"
        );
        ca_certificate::ActiveModel {
            id: Default::default(),
            certificate_use: Set(certificate_use.to_string()),
            hash_algorithm: Set(hash_data.hash_algorithm.to_string()),
            issuer_name_hash: Set(hash_data.issuer_name_hash.clone()),
            issuer_key_hash: Set(hash_data.issuer_key_hash.clone()),
            serial_number: Set(hash_data.serial_number.clone()),
            certificate: Set(certificate_pem.to_string()),
            in_use: Set(false),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    async fn find(
        &self,
        hash_data: &CertificateHashData,
    ) -> ChargePointResult<Option<ca_certificate::Model>> {
        Ok(ca_certificate::Entity::find()
            .filter(ca_certificate::Column::IssuerNameHash.eq(&hash_data.issuer_name_hash))
            .filter(ca_certificate::Column::IssuerKeyHash.eq(&hash_data.issuer_key_hash))
            .filter(ca_certificate::Column::SerialNumber.eq(&hash_data.serial_number))
            .one(&self.db)
            .await?)
    }

    pub async fn delete(
        &self,
        hash_data: &CertificateHashData,
    ) -> ChargePointResult<CaDeleteOutcome> {
        match self.find(hash_data).await? {
            None => Ok(CaDeleteOutcome::NotFound),
            Some(row) if row.in_use => {
                warn!(
                    serial = hash_data.serial_number.as_str(),
                    "Refusing to delete in-use certificate"
                );
                Ok(CaDeleteOutcome::InUse)
            }
            Some(row) => {
                ca_certificate::Entity::delete_by_id(row.id).exec(&self.db).await?;
                Ok(CaDeleteOutcome::Deleted)
            }
        }
    }

    pub async fn list(
        &self,
        certificate_use: CertificateUse,
    ) -> ChargePointResult<Vec<CertificateHashData>> {
        Ok(ca_certificate::Entity::find()
            .filter(ca_certificate::Column::CertificateUse.eq(certificate_use.to_string()))
            .order_by_asc(ca_certificate::Column::Id)
            .all(&self.db)
            .await?
            .iter()
            .map(hash_data_of)
            .collect())
    }

    pub async fn mark_in_use(
        &self,
        hash_data: &CertificateHashData,
        in_use: bool,
    ) -> ChargePointResult<()> {
        if let Some(row) = self.find(hash_data).await? {
            let mut row: ca_certificate::ActiveModel = row.into();
            row.in_use = Set(in_use);
            row.update(&self.db).await?;
        }
        Ok(())
    }

    pub async fn has_any(&self, certificate_use: CertificateUse) -> ChargePointResult<bool> {
        Ok(!self.list(certificate_use).await?.is_empty())
    }
}

// ── Charge point certificates ──────────────────────────────────

#[derive(Clone)]
pub struct CpCertificateRepository {
    db: DatabaseConnection,
}

impl CpCertificateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Store a new pending CSR. At most one CSR may be pending: any
    /// previous unsigned request is discarded.
    pub async fn create_pending(&self, csr_pem: &str) -> ChargePointResult<()> {
        cp_certificate::Entity::delete_many()
            .filter(cp_certificate::Column::SignedAt.is_null())
            .exec(&self.db)
            .await?;
        cp_certificate::ActiveModel {
            id: Default::default(),
            csr: Set(csr_pem.to_string()),
            certificate_chain: Set(String::new()),
            requested_at: Set(Utc::now()),
            signed_at: Set(None),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn pending(&self) -> ChargePointResult<Option<cp_certificate::Model>> {
        Ok(cp_certificate::Entity::find()
            .filter(cp_certificate::Column::SignedAt.is_null())
            .one(&self.db)
            .await?)
    }

    /// Attach the signed chain to the pending CSR.
    pub async fn complete_pending(&self, certificate_chain: &str) -> ChargePointResult<bool> {
        match self.pending().await? {
            Some(row) => {
                debug!(id = row.id, "Charge point certificate signed");
                let mut row: cp_certificate::ActiveModel = row.into();
                row.certificate_chain = Set(certificate_chain.to_string());
                row.signed_at = Set(Some(Utc::now()));
                row.update(&self.db).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Latest signed certificate chain, if any.
    pub async fn latest_signed(&self) -> ChargePointResult<Option<cp_certificate::Model>> {
        Ok(cp_certificate::Entity::find()
            .filter(cp_certificate::Column::SignedAt.is_not_null())
            .order_by_desc(cp_certificate::Column::Id)
            .one(&self.db)
            .await?)
    }
}

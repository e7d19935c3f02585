// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Synced survey inventory: surveys, quotas and quota qualifications.
//!
//! Surveys are unique per `(provider, external bid id)`, quotas per
//! `(survey, external quota id)` and qualifications per `(quota, question id)`.
//! Nothing in this repository ever deletes a row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    composite_key, composite_prefix, docs_with_prefix, get_doc, index_get, index_with_prefix,
    put_doc, PartnerDatabase, StorageError, StorageResult, QUALIFICATIONS, QUOTAS,
    QUOTA_BY_EXTERNAL, SURVEYS, SURVEY_BY_BID,
};
use crate::storage::ports::SurveyStore;

/// A partner bid mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExternalSurvey {
    pub id: String,
    pub provider_id: String,
    pub external_bid_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    /// Highest quota CPI in cents.
    pub cpi_cents: i64,
    #[serde(default)]
    pub loi_minutes: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A quota within a survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SurveyQuota {
    pub id: String,
    pub survey_id: String,
    pub external_quota_id: String,
    pub cpi_cents: i64,
    pub loi_minutes: Option<i64>,
    pub required_completes: i64,
    pub current_completes: i64,
    pub is_open: bool,
    pub updated_at: DateTime<Utc>,
}

/// Targeting criterion on a quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuotaQualification {
    pub id: String,
    pub quota_id: String,
    pub question_id: String,
    pub answers: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by a survey upsert.
#[derive(Debug, Clone)]
pub struct SurveyUpsert {
    pub provider_id: String,
    pub external_bid_id: String,
    pub name: Option<String>,
    pub country: Option<String>,
    pub languages: Vec<String>,
    pub cpi_cents: i64,
    pub loi_minutes: Option<i64>,
    pub is_active: bool,
}

/// Fields written by a quota upsert.
#[derive(Debug, Clone)]
pub struct QuotaUpsert {
    pub survey_id: String,
    pub external_quota_id: String,
    pub cpi_cents: i64,
    pub loi_minutes: Option<i64>,
    pub required_completes: i64,
    pub current_completes: i64,
    pub is_open: bool,
}

/// redb-backed survey inventory repository.
#[derive(Clone)]
pub struct SurveyRepository {
    db: Arc<PartnerDatabase>,
}

impl SurveyRepository {
    pub fn new(db: Arc<PartnerDatabase>) -> Self {
        Self { db }
    }

    fn surveys_of(&self, provider_id: &str) -> StorageResult<Vec<ExternalSurvey>> {
        let txn = self.db.read()?;
        let index = txn.open_table(SURVEY_BY_BID)?;
        let table = txn.open_table(SURVEYS)?;

        let mut surveys = Vec::new();
        for (_, survey_id) in index_with_prefix(&index, &composite_prefix(provider_id))? {
            if let Some(survey) = get_doc::<ExternalSurvey>(&table, &survey_id)? {
                surveys.push(survey);
            }
        }
        Ok(surveys)
    }
}

impl SurveyStore for SurveyRepository {
    fn active_bid_ids(&self, provider_id: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .surveys_of(provider_id)?
            .into_iter()
            .filter(|s| s.is_active)
            .map(|s| s.external_bid_id)
            .collect())
    }

    fn upsert_survey(&self, input: &SurveyUpsert) -> StorageResult<ExternalSurvey> {
        let now = Utc::now();
        let key = composite_key(&input.provider_id, &input.external_bid_id);

        let txn = self.db.write()?;
        let survey = {
            let mut index = txn.open_table(SURVEY_BY_BID)?;
            let mut table = txn.open_table(SURVEYS)?;

            let existing = match index_get(&index, &key)? {
                Some(survey_id) => get_doc::<ExternalSurvey>(&table, &survey_id)?,
                None => None,
            };

            let survey = match existing {
                Some(mut survey) => {
                    survey.name = input.name.clone();
                    survey.country = input.country.clone();
                    survey.languages = input.languages.clone();
                    survey.cpi_cents = input.cpi_cents;
                    survey.loi_minutes = input.loi_minutes;
                    survey.is_active = input.is_active;
                    survey.updated_at = now;
                    survey
                }
                None => ExternalSurvey {
                    id: uuid::Uuid::new_v4().to_string(),
                    provider_id: input.provider_id.clone(),
                    external_bid_id: input.external_bid_id.clone(),
                    name: input.name.clone(),
                    country: input.country.clone(),
                    languages: input.languages.clone(),
                    cpi_cents: input.cpi_cents,
                    loi_minutes: input.loi_minutes,
                    is_active: input.is_active,
                    created_at: now,
                    updated_at: now,
                },
            };

            put_doc(&mut table, &survey.id, &survey)?;
            index.insert(key.as_str(), survey.id.as_str())?;
            survey
        };
        txn.commit()?;
        Ok(survey)
    }

    fn upsert_quota(&self, input: &QuotaUpsert) -> StorageResult<SurveyQuota> {
        let now = Utc::now();
        let key = composite_key(&input.survey_id, &input.external_quota_id);

        let txn = self.db.write()?;
        let quota = {
            let mut index = txn.open_table(QUOTA_BY_EXTERNAL)?;
            let mut table = txn.open_table(QUOTAS)?;

            let id = match index_get(&index, &key)? {
                Some(id) => id,
                None => uuid::Uuid::new_v4().to_string(),
            };
            let quota = SurveyQuota {
                id,
                survey_id: input.survey_id.clone(),
                external_quota_id: input.external_quota_id.clone(),
                cpi_cents: input.cpi_cents,
                loi_minutes: input.loi_minutes,
                required_completes: input.required_completes,
                current_completes: input.current_completes,
                is_open: input.is_open,
                updated_at: now,
            };

            put_doc(&mut table, &quota.id, &quota)?;
            index.insert(key.as_str(), quota.id.as_str())?;
            quota
        };
        txn.commit()?;
        Ok(quota)
    }

    fn upsert_qualification(
        &self,
        quota_id: &str,
        question_id: &str,
        answers: &[String],
    ) -> StorageResult<QuotaQualification> {
        let key = composite_key(quota_id, question_id);

        let txn = self.db.write()?;
        let qualification = {
            let mut table = txn.open_table(QUALIFICATIONS)?;
            let id = get_doc::<QuotaQualification>(&table, &key)?
                .map(|q| q.id)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let qualification = QuotaQualification {
                id,
                quota_id: quota_id.to_string(),
                question_id: question_id.to_string(),
                answers: answers.to_vec(),
                updated_at: Utc::now(),
            };
            put_doc(&mut table, &key, &qualification)?;
            qualification
        };
        txn.commit()?;
        Ok(qualification)
    }

    fn deactivate(&self, provider_id: &str, external_bid_ids: &[String]) -> StorageResult<usize> {
        if external_bid_ids.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();

        let txn = self.db.write()?;
        let mut changed = 0;
        {
            let index = txn.open_table(SURVEY_BY_BID)?;
            let mut table = txn.open_table(SURVEYS)?;

            for bid_id in external_bid_ids {
                let Some(survey_id) = index_get(&index, &composite_key(provider_id, bid_id))?
                else {
                    continue;
                };
                let Some(mut survey) = get_doc::<ExternalSurvey>(&table, &survey_id)? else {
                    continue;
                };
                if !survey.is_active {
                    continue;
                }
                survey.is_active = false;
                survey.updated_at = now;
                put_doc(&mut table, &survey.id, &survey)?;
                changed += 1;
            }
        }
        txn.commit()?;
        Ok(changed)
    }

    fn find_by_bid(
        &self,
        provider_id: &str,
        external_bid_id: &str,
    ) -> StorageResult<Option<ExternalSurvey>> {
        let txn = self.db.read()?;
        let index = txn.open_table(SURVEY_BY_BID)?;
        let Some(survey_id) = index_get(&index, &composite_key(provider_id, external_bid_id))?
        else {
            return Ok(None);
        };
        let table = txn.open_table(SURVEYS)?;
        get_doc(&table, &survey_id)
    }

    fn list_active_with_min_cpi(
        &self,
        provider_id: &str,
        min_cpi_cents: i64,
    ) -> StorageResult<Vec<ExternalSurvey>> {
        let mut surveys: Vec<ExternalSurvey> = self
            .surveys_of(provider_id)?
            .into_iter()
            .filter(|s| s.is_active && s.cpi_cents >= min_cpi_cents)
            .collect();
        surveys.sort_by(|a, b| b.cpi_cents.cmp(&a.cpi_cents));
        Ok(surveys)
    }

    fn list_quotas(&self, survey_id: &str) -> StorageResult<Vec<SurveyQuota>> {
        let txn = self.db.read()?;
        let index = txn.open_table(QUOTA_BY_EXTERNAL)?;
        let table = txn.open_table(QUOTAS)?;

        let mut quotas = Vec::new();
        for (_, quota_id) in index_with_prefix(&index, &composite_prefix(survey_id))? {
            let quota = get_doc::<SurveyQuota>(&table, &quota_id)?
                .ok_or_else(|| StorageError::NotFound(format!("Quota {quota_id}")))?;
            quotas.push(quota);
        }
        Ok(quotas)
    }

    fn list_qualifications(&self, quota_id: &str) -> StorageResult<Vec<QuotaQualification>> {
        let txn = self.db.read()?;
        let table = txn.open_table(QUALIFICATIONS)?;
        docs_with_prefix(&table, &composite_prefix(quota_id))
    }
}

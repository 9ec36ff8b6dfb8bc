use super::domain::{
    Establishment, EstablishmentId, Nationality, NationalityCode, Profession, ProfessionId,
    RequestSubmission,
};
use super::snapshot::WorldSnapshot;

/// Validation errors raised before a submission enters the decision pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown nationality {0}")]
    UnknownNationality(NationalityCode),
    #[error("nationality {0} is not subject to quota allocation")]
    NotRestricted(NationalityCode),
    #[error("unknown profession {0}")]
    UnknownProfession(ProfessionId),
    #[error("unknown establishment {0}")]
    UnknownEstablishment(EstablishmentId),
    #[error("requested worker count must be positive")]
    EmptyRequest,
}

/// A submission whose references all resolved against the snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedSubmission<'a> {
    pub nationality: &'a Nationality,
    pub profession: &'a Profession,
    pub establishment: &'a Establishment,
    pub requested_count: u32,
}

pub fn validate_submission<'a>(
    snapshot: &'a WorldSnapshot,
    submission: &RequestSubmission,
) -> Result<ValidatedSubmission<'a>, ValidationError> {
    let nationality = snapshot
        .nationalities
        .get(&submission.nationality)
        .ok_or_else(|| ValidationError::UnknownNationality(submission.nationality.clone()))?;
    if !nationality.restricted {
        return Err(ValidationError::NotRestricted(nationality.code.clone()));
    }

    let profession = snapshot
        .professions
        .get(&submission.profession)
        .ok_or_else(|| ValidationError::UnknownProfession(submission.profession.clone()))?;

    let establishment = snapshot
        .establishments
        .get(&submission.establishment)
        .ok_or_else(|| ValidationError::UnknownEstablishment(submission.establishment.clone()))?;

    if submission.requested_count == 0 {
        return Err(ValidationError::EmptyRequest);
    }

    Ok(ValidatedSubmission {
        nationality,
        profession,
        establishment,
        requested_count: submission.requested_count,
    })
}

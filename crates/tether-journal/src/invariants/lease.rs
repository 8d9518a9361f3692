//! I3: `lease_owner` and `lease_expires_at` are both null or both set.

use super::InvariantState;
use crate::error::JournalViolation;

pub(crate) fn check(state: &InvariantState) -> Result<(), JournalViolation> {
    if state.lease_owner.is_some() != state.lease_expires_at.is_some() {
        return Err(JournalViolation::LeaseFieldsInconsistent {
            instance_id: state.instance_id.clone(),
        });
    }
    Ok(())
}

use shiftdb_db::{Backfill, ColumnDef, DataType, MigrationStep, Operation, Predicate};

const TABLE: &str = "users";

/// Email verification columns. Users that existed before this step are
/// treated as already verified; new signups start unverified.
pub(super) fn step() -> MigrationStep {
    MigrationStep::new(20240102000000, "add_email_verification_to_users")
        .with_up(Operation::add_column(
            TABLE,
            ColumnDef::new("is_email_verified", DataType::Boolean)
                .not_null()
                .default_value(false),
        ))
        .with_up(Operation::add_column(
            TABLE,
            ColumnDef::new("email_verification_code", DataType::String(6)),
        ))
        .with_up(Operation::add_column(
            TABLE,
            ColumnDef::new("email_verification_expires", DataType::Date),
        ))
        // Profile fields held until the address is confirmed.
        .with_up(Operation::add_column(
            TABLE,
            ColumnDef::new("temp_profile_data", DataType::Text),
        ))
        .with_up(Operation::backfill(
            Backfill::new(TABLE, Predicate::before_now("created_at"))
                .set("is_email_verified", true),
        ))
        .with_down(Operation::remove_column(TABLE, "is_email_verified"))
        .with_down(Operation::remove_column(TABLE, "email_verification_code"))
        .with_down(Operation::remove_column(TABLE, "email_verification_expires"))
        .with_down(Operation::remove_column(TABLE, "temp_profile_data"))
}

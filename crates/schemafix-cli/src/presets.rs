//! Built-in recipes for known defects.

use schemafix_core::migration::{DefectPattern, MigrationRecipe, RowFilter, SchemaChange};

/// The retired users table that stale foreign keys still point at.
const LEGACY_USERS: &str = "users_legacy_backup";

/// Every built-in recipe, in listing order.
pub fn all() -> Vec<MigrationRecipe> {
    vec![
        fix_user_roles_fk(),
        fix_user_permissions_fk(),
        clean_endpoints_structure(),
        rename_postman_variables(),
    ]
}

/// Look up a recipe by name, ignoring case.
pub fn find(name: &str) -> Option<MigrationRecipe> {
    all().into_iter().find(|r| r.name.eq_ignore_ascii_case(name))
}

fn retarget_users(name: &str, table: &str) -> MigrationRecipe {
    MigrationRecipe::new(name, table, DefectPattern::foreign_key_targets(LEGACY_USERS))
        .with_change(SchemaChange::retarget_foreign_key(LEGACY_USERS, "users"))
        .with_row_filter(RowFilter::reference_exists("user_id", "users", "id"))
        .with_rewrite(LEGACY_USERS, "users")
        .requires_table("users")
}

pub fn fix_user_roles_fk() -> MigrationRecipe {
    retarget_users("fix-user-roles-fk", "user_roles").with_description(
        "Point user_roles.user_id at users instead of users_legacy_backup; drop orphan rows",
    )
}

pub fn fix_user_permissions_fk() -> MigrationRecipe {
    retarget_users("fix-user-permissions-fk", "user_permissions")
        .with_description(
            "Point user_permissions.user_id at users instead of users_legacy_backup; drop orphan rows",
        )
        .with_index(
            "CREATE INDEX IF NOT EXISTS idx_user_permissions_active ON user_permissions (user_id, is_active)",
        )
}

pub fn clean_endpoints_structure() -> MigrationRecipe {
    MigrationRecipe::new(
        "clean-endpoints-structure",
        "application_endpoints",
        DefectPattern::has_columns(["application_id", "environment_id", "country_id"]),
    )
    .with_description(
        "Drop denormalized application/environment/country columns from application_endpoints; \
         keep rows linked to a mapping",
    )
    .with_change(SchemaChange::drop_columns([
        "application_id",
        "environment_id",
        "country_id",
    ]))
    .with_row_filter(RowFilter::not_null("mapping_id"))
}

pub fn rename_postman_variables() -> MigrationRecipe {
    MigrationRecipe::new(
        "rename-postman-variables",
        "app_environment_country_mappings",
        DefectPattern::AllOf {
            patterns: vec![
                DefectPattern::has_columns(["postman_variables"]),
                DefectPattern::missing_columns(["execution_variables"]),
            ],
        },
    )
    .with_description("Rename postman_variables to execution_variables, keeping its values")
    .with_change(SchemaChange::rename_column("postman_variables", "execution_variables"))
}

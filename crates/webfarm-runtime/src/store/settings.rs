use sqlx::{PgPool, Row};

use webfarm_core::config::FarmSettings;
use webfarm_core::Result;

use super::db_err;

/// Load the farm-wide settings row, if one has been saved.
pub async fn load_farm_settings(pool: &PgPool) -> Result<Option<FarmSettings>> {
    let row = sqlx::query(
        r#"
        SELECT enabled,
               leadership_polling_interval_lower_limit_secs,
               leadership_polling_interval_upper_limit_secs
        FROM webfarm_settings
        WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let lower: i32 = row.try_get("leadership_polling_interval_lower_limit_secs")?;
    let upper: i32 = row.try_get("leadership_polling_interval_upper_limit_secs")?;

    // Negative bounds read as zero and fail validation at stage 1.
    Ok(Some(FarmSettings {
        enabled: row.try_get("enabled")?,
        leadership_polling_interval_lower_limit_secs: u32::try_from(lower).unwrap_or(0),
        leadership_polling_interval_upper_limit_secs: u32::try_from(upper).unwrap_or(0),
    }))
}

/// Farm-wide settings from the shared table, falling back to `file` when no
/// row exists or it cannot be read.
pub async fn effective_farm_settings(pool: &PgPool, file: &FarmSettings) -> FarmSettings {
    match load_farm_settings(pool).await {
        Ok(Some(settings)) => {
            tracing::debug!("Using farm settings from the database");
            settings
        }
        Ok(None) => file.clone(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load farm settings, using configuration file");
            file.clone()
        }
    }
}

/// Save the farm-wide settings row.
pub async fn save_farm_settings(pool: &PgPool, settings: &FarmSettings) -> Result<()> {
    settings.validate()?;

    sqlx::query(
        r#"
        INSERT INTO webfarm_settings (
            id, enabled,
            leadership_polling_interval_lower_limit_secs,
            leadership_polling_interval_upper_limit_secs
        ) VALUES (1, $1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET
            enabled = EXCLUDED.enabled,
            leadership_polling_interval_lower_limit_secs = EXCLUDED.leadership_polling_interval_lower_limit_secs,
            leadership_polling_interval_upper_limit_secs = EXCLUDED.leadership_polling_interval_upper_limit_secs,
            updated_at = NOW()
        "#,
    )
    .bind(settings.enabled)
    .bind(settings.leadership_polling_interval_lower_limit_secs as i32)
    .bind(settings.leadership_polling_interval_upper_limit_secs as i32)
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(())
}

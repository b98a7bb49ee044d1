use crate::commands::{block_on, load_config, CommandResult};
use stayql_db::{connect_with_settings, migrations, DemoDataset, SeedResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("seed", async {
        let pool = connect_with_settings(
            &config.dataset.url,
            config.dataset.max_connections,
            config.dataset.timeout_secs,
        )
        .await
        .map_err(|error| ("dataset_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));

        pool.close().await;
        seeded
    });

    match result {
        Ok(Ok(seeded)) => CommandResult::success("seed", summary(&seeded)),
        Ok(Err((error_class, message, exit_code))) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
        Err(failure) => failure,
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo dataset loaded: {} reservations, {} reviews (2024-01 through 2025-12)",
        seeded.reservations, seeded.reviews
    )
}

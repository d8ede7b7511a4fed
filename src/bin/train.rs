// Blueprint training entry point. Fits (or reloads) the card abstraction,
// resumes from the latest checkpoint when one exists, trains to the
// configured budget, and writes the blueprint policy plus a human-readable
// preflop range report.

use maverick::abstraction::CardAbstraction;
use maverick::config::{Config, CONFIG};
use maverick::policy::Policy;
use maverick::trainer::Trainer;
use std::fs;
use std::path::Path;

const PRODUCTS_DIR: &str = "products";
const ABSTRACTION_FILE: &str = "products/abstraction.bin";
const BLUEPRINT_FILE: &str = "products/blueprint.bin";
const PREFLOP_REPORT_FILE: &str = "products/preflop.json";

fn main() -> maverick::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config: Config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path)?,
        None => CONFIG.clone(),
    };
    config.validate()?;
    fs::create_dir_all(PRODUCTS_DIR)?;

    let abstraction = load_or_fit_abstraction(&config)?;
    log::info!("abstraction hash {:#018x}", abstraction.hash());

    let mut trainer = Trainer::resume_or_new(&config, abstraction)?;
    let policy: Policy = trainer.run()?;
    log::info!(
        "training complete at iteration {}: {} infosets",
        trainer.iteration,
        policy.len()
    );

    policy.save(Path::new(BLUEPRINT_FILE))?;
    fs::write(
        PREFLOP_REPORT_FILE,
        serde_json::to_string_pretty(&policy.preflop_report())?,
    )?;
    log::info!("blueprint written to {BLUEPRINT_FILE}");
    Ok(())
}

/// The fit is the slow part of startup, so it is cached on disk and reused
/// as long as the abstraction configuration is unchanged.
fn load_or_fit_abstraction(config: &Config) -> maverick::Result<CardAbstraction> {
    let path = Path::new(ABSTRACTION_FILE);
    if path.is_file() {
        let bytes = fs::read(path)?;
        if let Ok(cached) = bincode::deserialize::<CardAbstraction>(&bytes) {
            if cached.matches(&config.abstraction) {
                log::info!("reusing fitted abstraction from {ABSTRACTION_FILE}");
                return Ok(cached);
            }
            log::info!("abstraction configuration changed; refitting");
        }
    }
    log::info!(
        "fitting abstraction ({} samples per street)",
        config.abstraction.fit_samples
    );
    let abstraction = CardAbstraction::fit(&config.abstraction);
    fs::write(path, bincode::serialize(&abstraction)?)?;
    Ok(abstraction)
}

//! Feature-tier checks for `execguard-common`
//!
//! The core crate pulls in `runtime` and the infra crate only `foundation`,
//! so each tier has to build and pass its own tests without the other.

use anyhow::Result;

use crate::cargo;

/// One `execguard-common` build to verify
struct Tier {
    name: &'static str,
    features: &'static str,
    /// Tier has tests worth running, not just a build
    run_tests: bool,
}

const TIERS: &[Tier] = &[
    Tier { name: "bare", features: "", run_tests: false },
    Tier { name: "foundation", features: "foundation", run_tests: true },
    Tier { name: "runtime", features: "runtime", run_tests: true },
];

/// Crates that depend on one tier each; built after the tiers pass
const CONSUMERS: &[(&str, &str)] =
    &[("execguard-infra", "foundation"), ("execguard-core", "runtime")];

/// Build and test each tier, then each consumer crate
pub fn check_tiers() -> Result<()> {
    for (index, tier) in TIERS.iter().enumerate() {
        println!("[tier {}/{}] execguard-common: {}", index + 1, TIERS.len(), tier.name);

        let subcommand = if tier.run_tests { "test" } else { "check" };
        let mut args = vec![subcommand, "-p", "execguard-common", "--no-default-features"];
        if !tier.features.is_empty() {
            args.extend(["--features", tier.features]);
        }
        cargo(&args)?;
    }

    for (crate_name, tier) in CONSUMERS {
        println!("[consumer] {crate_name} on the {tier} tier");
        cargo(&["check", "-p", crate_name, "--all-targets"])?;
    }

    println!("execguard-common tiers and their consumers build");
    Ok(())
}

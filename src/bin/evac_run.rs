//! Batch runner
//!
//! Usage:
//!   evac-run simulate <engine> <scenario.json | sample> [--preset NAME] [--agents N]
//!                     [--panic X] [--steps N] [--out FILE]
//!   evac-run train <engine> <scenario.json | sample> [--preset NAME] [--agents N]
//!                  [--panic X] [--config FILE] [--episodes N] [--no-fairness]
//!                  [--save FILE] [--out FILE]
//!   evac-run presets
//!
//! `engine` is micro, meso or macro; samples are office, mall, stadium and
//! school. The preset decides the crowd size and panic level unless `--agents`
//! or `--panic` override them. Results are written as JSON to `--out` or stdout. Set `EVAC_LOG`
//! to change the log filter.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

use evacforge_core::core::{samples, PRESET_NAMES};
use evacforge_core::training::train_scenario;
use evacforge_core::{
    setup_logging, simulate, EngineKind, NoopObserver, ParameterPreset, PresetOverrides, RunBudget,
    Scenario, TrainingConfig,
};

struct Args {
    command: String,
    engine: Option<EngineKind>,
    scenario: Option<String>,
    preset: Option<String>,
    overrides: PresetOverrides,
    steps: Option<usize>,
    config: Option<String>,
    episodes: Option<usize>,
    no_fairness: bool,
    save: Option<String>,
    out: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut raw = std::env::args().skip(1);
    let command = raw.next().ok_or_else(|| anyhow!("missing command (simulate, train, presets)"))?;
    let mut args = Args {
        command,
        engine: None,
        scenario: None,
        preset: None,
        overrides: PresetOverrides::default(),
        steps: None,
        config: None,
        episodes: None,
        no_fairness: false,
        save: None,
        out: None,
    };
    let mut positional = Vec::new();
    while let Some(arg) = raw.next() {
        let mut value = |flag: &str| raw.next().ok_or_else(|| anyhow!("{flag} needs a value"));
        match arg.as_str() {
            "--preset" => args.preset = Some(value("--preset")?),
            "--agents" => {
                args.overrides.agent_count = Some(value("--agents")?.parse().context("--agents")?)
            }
            "--panic" => args.overrides.panic_factor = Some(value("--panic")?.parse().context("--panic")?),
            "--steps" => args.steps = Some(value("--steps")?.parse().context("--steps")?),
            "--config" => args.config = Some(value("--config")?),
            "--episodes" => args.episodes = Some(value("--episodes")?.parse().context("--episodes")?),
            "--save" => args.save = Some(value("--save")?),
            "--out" => args.out = Some(value("--out")?),
            "--no-fairness" => args.no_fairness = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            _ => positional.push(arg),
        }
    }
    let mut positional = positional.into_iter();
    if let Some(engine) = positional.next() {
        args.engine = Some(engine.parse()?);
    }
    args.scenario = positional.next();
    Ok(args)
}

fn load_scenario(spec: &str) -> Result<Scenario> {
    if let Some(sample) = samples::by_name(spec) {
        return Ok(sample);
    }
    let json = std::fs::read_to_string(spec)
        .with_context(|| format!("`{spec}` is neither a sample name nor a readable file"))?;
    Scenario::from_json(&json).with_context(|| format!("invalid scenario in {spec}"))
}

fn write_json<T: Serialize>(value: &T, out: Option<&str>) -> Result<()> {
    let json = serde_json::to_string(value)?;
    match out {
        Some(path) => std::fs::write(Path::new(path), json)
            .with_context(|| format!("writing {path}"))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    setup_logging(std::env::var("EVAC_LOG").ok());
    let args = parse_args()?;

    if args.command == "presets" {
        let presets = PRESET_NAMES
            .iter()
            .map(|name| ParameterPreset::named(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        return write_json(&presets, args.out.as_deref());
    }

    let engine = args.engine.ok_or_else(|| anyhow!("missing engine (micro, meso, macro)"))?;
    let scenario_spec = args.scenario.as_deref().ok_or_else(|| anyhow!("missing scenario"))?;
    let scenario = load_scenario(scenario_spec)?;
    let preset = ParameterPreset::resolve(args.preset.as_deref(), &args.overrides)?;

    match args.command.as_str() {
        "simulate" => {
            let budget = args.steps.map_or_else(RunBudget::unlimited, RunBudget::steps);
            let output = simulate(&scenario, engine, &preset, &budget, &mut NoopObserver)?;
            write_json(&output, args.out.as_deref())
        }
        "train" => {
            let mut config = match &args.config {
                Some(path) => {
                    let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
                    serde_json::from_str::<TrainingConfig>(&json)
                        .with_context(|| format!("invalid training config in {path}"))?
                }
                None => TrainingConfig::default(),
            };
            if let Some(episodes) = args.episodes {
                config.episodes = episodes;
            }
            if args.no_fairness {
                config.use_fairness = false;
            }
            let run = train_scenario(&scenario, engine, &preset, &config, &mut NoopObserver)?;
            if let Some(path) = &args.save {
                run.policy.save(path)?;
            }
            write_json(&run.report, args.out.as_deref())
        }
        other => bail!("unknown command `{other}`"),
    }
}

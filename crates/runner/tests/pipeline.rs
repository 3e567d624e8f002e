use anyhow::Result;
use platbench_backend::{Backend, DriverArtifact, PythonBackend};
use platbench_cache::Cache;
use platbench_ir::{baseline, parse_real, OperatorSet, ProgramCore, ProgramKey, Sample};
use platbench_optimizer::testing::ScriptedLauncher;
use platbench_optimizer::{combine_frontiers, dominates, OptimizerClient, Point};
use platbench_runner::{ConfigError, Orchestrator, RunnerConfig, SampleTable, Stage};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

/// Writes the compiled text and row count; "times" each driver as its row count.
struct CountingBackend;

impl Backend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn lang(&self) -> &str {
        "python"
    }

    fn time_unit(&self) -> &str {
        "ms"
    }

    fn operators(&self) -> OperatorSet {
        OperatorSet::default()
    }

    fn generate_driver(
        &self,
        core: &ProgramCore,
        sample: &Sample,
        dir: &Path,
    ) -> Result<DriverArtifact> {
        fs::create_dir_all(dir)?;
        let entry = dir.join("driver.txt");
        let compiled = core.compiled.as_deref().unwrap_or_default();
        fs::write(&entry, format!("{}\n{}\n", compiled, sample.num_points()))?;
        Ok(DriverArtifact {
            name: core.name.clone(),
            dir: dir.to_path_buf(),
            entry,
            rows: sample.num_points(),
        })
    }

    fn build(&self, _artifacts: &[DriverArtifact]) -> Result<()> {
        Ok(())
    }

    fn execute(&self, artifacts: &[DriverArtifact], _num_runs: usize) -> Result<Vec<f64>> {
        Ok(artifacts.iter().map(|a| a.rows as f64).collect())
    }
}

fn program_name(request: &str) -> Option<String> {
    let start = request.find(":name \"")? + ":name \"".len();
    let end = request[start..].find('"')?;
    Some(request[start..start + end].to_string())
}

fn all_names(request: &str) -> Vec<String> {
    request
        .split(":name \"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}

/// `(pareto ((c e) ..) ..)` back into its groups of points.
fn pareto_request_groups(request: &str) -> Vec<Vec<Point>> {
    let body = request
        .trim()
        .strip_prefix("(pareto")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap();

    let mut groups = Vec::new();
    let mut values = Vec::new();
    let mut token = String::new();
    let mut depth = 0;
    for ch in body.chars().chain(std::iter::once(' ')) {
        if ch == '(' || ch == ')' || ch == ' ' {
            if !token.is_empty() {
                values.push(parse_real(&token).unwrap());
                token.clear();
            }
        } else {
            token.push(ch);
        }
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    groups.push(values.chunks(2).map(|p| (p[0], p[1])).collect());
                    values.clear();
                }
            }
            _ => {}
        }
    }
    groups
}

fn improve_results(names: &[String]) -> String {
    let tests: Vec<serde_json::Value> = names
        .iter()
        .flat_map(|name| {
            [(10.0, 0.5), (20.0, 0.1)].map(|(cost, end)| {
                serde_json::json!({
                    "vars": ["x0"],
                    "name": name,
                    "prec": "binary64",
                    "pre": "TRUE",
                    "spec": format!("({} x0)", name),
                    "output": format!("({} x0)", name),
                    "cost-accuracy": [[100.0, 1.0], [cost, end], []],
                    "end": end,
                })
            })
        })
        .collect();
    serde_json::json!({ "tests": tests }).to_string()
}

/// A scripted optimizer that understands every command the runner sends.
/// Programs named in `undesugarable` have no rewriting.
fn optimizer(undesugarable: &'static [&'static str]) -> ScriptedLauncher {
    ScriptedLauncher::new(move |_platform, request| {
        let command = request
            .trim_start_matches('(')
            .split_whitespace()
            .next()
            .unwrap_or_default();
        let lines = match command {
            "compile" => vec!["def foo(*args):\\n    return 0.0".to_string()],
            "sample" => {
                let n: usize = request.split_whitespace().nth(1).unwrap().parse()?;
                let records: Vec<String> = (0..n).map(|i| format!("{}.5,{}.0", i, i)).collect();
                vec![records.join("|")]
            }
            "cost" => vec!["7.0".to_string()],
            "error" => vec!["0.25".to_string()],
            "improve" => {
                // the output directory is the last quoted token
                let dir = request.rsplit('"').nth(1).unwrap();
                fs::write(Path::new(dir).join("results.json"), improve_results(&all_names(request)))?;
                Vec::new()
            }
            "resugar" => {
                let name = request.split('"').nth(1).unwrap();
                vec![format!("(FPCore (x0) :name \"{}\" ({} x0))", name, name)]
            }
            "desugar" => {
                let name = program_name(request).unwrap();
                if undesugarable.contains(&name.as_str()) {
                    vec!["#f".to_string()]
                } else {
                    let program = request
                        .strip_prefix("(desugar ")
                        .and_then(|rest| rest.strip_suffix(')'))
                        .unwrap();
                    vec![program.to_string()]
                }
            }
            "pareto" => {
                let points: Vec<String> = combine_frontiers(&pareto_request_groups(request))
                    .iter()
                    .map(|(cost, error)| format!("{} {}", cost, error))
                    .collect();
                vec![points.join("|")]
            }
            "read" => vec![
                "(FPCore (x) :name \"first\" (sqrt x))".to_string(),
                String::new(),
                "(FPCore (x) :name \"second\" (exp x))".to_string(),
            ],
            other => anyhow::bail!("unexpected command {}", other),
        };
        Ok(lines)
    })
}

fn config(dir: &Path) -> RunnerConfig {
    RunnerConfig {
        working_dir: dir.to_path_buf(),
        backend: "counting".to_string(),
        num_points: 4,
        num_runs: 1,
        threads: 2,
        ..RunnerConfig::default()
    }
}

fn orchestrator_with(
    config: RunnerConfig,
    launcher: &ScriptedLauncher,
    backend: Arc<dyn Backend>,
) -> Orchestrator {
    let cache = Cache::open(config.cache_dir()).unwrap();
    let client = OptimizerClient::new(Arc::new(launcher.clone()), config.platform.clone());
    Orchestrator::new(config, cache, client, backend).unwrap()
}

fn orchestrator(dir: &Path, launcher: &ScriptedLauncher) -> Orchestrator {
    orchestrator_with(config(dir), launcher, Arc::new(CountingBackend))
}

fn input(name: &str) -> ProgramCore {
    ProgramCore::parse(
        &format!("(FPCore (x) :name \"{}\" ({} x))", name, name),
        ProgramKey::new(&format!("test:{}", name)),
    )
    .unwrap()
}

fn scored(key: &ProgramKey, name: &str, cost: f64, error: f64) -> ProgramCore {
    let mut core = ProgramCore::new("(FPCore (x) x)", key.clone(), name, 1);
    core.cost = Some(cost);
    core.error = Some(error);
    core
}

#[test]
fn baseline_alone_yields_one_timing_without_rows() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let mut orchestrator = orchestrator_with(
        RunnerConfig {
            num_points: 0,
            ..config(dir.path())
        },
        &launcher,
        Arc::new(CountingBackend),
    );

    let summary = orchestrator.run_ops()?;
    assert_eq!(summary.timings, vec![("baseline".to_string(), 0.0)]);
    assert_eq!(launcher.count("sample"), 0);
    assert_eq!(launcher.count("compile"), 1);
    assert_eq!(
        summary.stages,
        vec![
            Stage::Synthesize,
            Stage::Compile,
            Stage::Sample,
            Stage::GenerateDrivers,
            Stage::Execute,
            Stage::Report,
        ]
    );
    assert!(summary.report_dir.join("report.json").exists());
    assert!(summary.report_dir.join("sample.json").exists());
    Ok(())
}

#[test]
fn python_baseline_driver_times_an_empty_sweep() -> Result<()> {
    let available = Command::new("python3")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);
    if !available {
        return Ok(());
    }

    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let mut orchestrator = orchestrator_with(
        RunnerConfig {
            backend: "python".to_string(),
            num_runs: 3,
            ..config(dir.path())
        },
        &launcher,
        Arc::new(PythonBackend::new()),
    );

    let mut cores = vec![baseline()];
    orchestrator.compile(&mut cores)?;
    let outcome = orchestrator.sample(&cores)?;
    let table = SampleTable::new(&cores, &outcome.samples);
    let drivers = orchestrator.generate_drivers(cores, &table)?;
    assert_eq!(drivers.artifacts.len(), 1);
    assert_eq!(drivers.artifacts[0].rows, 0);

    let times = orchestrator.execute(&drivers)?;
    assert_eq!(times.len(), 1);
    assert!(times[0].is_finite() && times[0] >= 0.0);
    Ok(())
}

#[test]
fn improve_pipeline_reuses_cached_variants() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let inputs = vec![input("sin"), input("cos")];

    let summary = orchestrator(dir.path(), &launcher).run_batch(inputs.clone(), None)?;
    assert_eq!(summary.inputs, 2);
    assert_eq!(summary.variants, 4);
    assert_eq!(summary.timings.len(), 4);
    assert!(summary.timings.iter().all(|(_, time)| *time == 4.0));
    assert_eq!(launcher.count("improve"), 1);
    assert_eq!(launcher.count("resugar"), 4);
    assert!(!summary.stages.contains(&Stage::Desugar));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(summary.report_dir.join("report.json"))?)?;
    let cores = report["cores"].as_array().unwrap();
    assert_eq!(cores.len(), 2);
    assert_eq!(cores[0]["input_core"]["name"], "sin");
    assert_eq!(cores[0]["platform_cores"].as_array().unwrap().len(), 2);
    assert_eq!(cores[0]["platform_cores"][0]["platform_core"]["cost"], 7.0);
    // both variants of each input score (7, 0.25); the batch picks one per key
    assert_eq!(report["frontier"], serde_json::json!([[14.0, 0.5]]));
    let keyed = report["key_frontiers"].as_array().unwrap();
    assert_eq!(keyed.len(), 2);
    assert_eq!(keyed[0]["key"], inputs[0].key().as_str());
    assert_eq!(keyed[0]["frontier"], serde_json::json!([[7.0, 0.25]]));
    assert_eq!(summary.key_frontiers.len(), 2);
    assert_eq!(summary.frontier, vec![(14.0, 0.5)]);

    // a fresh runner over the same working directory restores both tables
    let mut again = orchestrator(dir.path(), &launcher);
    assert_eq!(again.cache().count_variants(), 4);
    let summary = again.run_batch(inputs, None)?;
    assert_eq!(launcher.count("improve"), 1);
    assert_eq!(launcher.count("sample"), 2);
    assert_eq!(summary.cached_samples, 2);
    assert_eq!(summary.timings.len(), 4);
    Ok(())
}

#[test]
fn duplicate_input_names_abort_before_the_optimizer() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let mut orchestrator = orchestrator(dir.path(), &launcher);

    let first = input("sin");
    let second = ProgramCore::parse(&first.source, ProgramKey::new("test:other"))?;
    let err = orchestrator.improve(&[first, second], None).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::DuplicateName("sin".to_string()))
    );
    assert_eq!(launcher.sessions_opened(), 0);
    Ok(())
}

#[test]
fn frontier_keeps_incomparable_variants_and_drops_dominated_ones() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let mut orchestrator = orchestrator(dir.path(), &launcher);
    let key = ProgramKey::new("test:f");

    let pair = vec![scored(&key, "a", 10.0, 0.5), scored(&key, "b", 20.0, 0.1)];
    let frontiers = orchestrator.pareto(&pair)?;
    assert_eq!(frontiers.groups.len(), 1);
    assert_eq!(frontiers.groups[0].0, key);
    assert_eq!(frontiers.groups[0].1, vec![(10.0, 0.5), (20.0, 0.1)]);

    let mut triple = pair.clone();
    triple.push(scored(&key, "c", 30.0, 0.6));
    let frontiers = orchestrator.pareto(&triple)?;
    assert_eq!(frontiers.groups[0].1, vec![(10.0, 0.5), (20.0, 0.1)]);
    assert_eq!(frontiers.batch, vec![(10.0, 0.5), (20.0, 0.1)]);
    for a in &frontiers.batch {
        for b in &frontiers.batch {
            assert!(!dominates(*a, *b));
        }
    }
    Ok(())
}

#[test]
fn pareto_groups_follow_logical_keys() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let mut orchestrator = orchestrator(dir.path(), &launcher);
    let f = ProgramKey::new("test:f");
    let g = ProgramKey::new("test:g");

    let cores = vec![
        scored(&f, "f1", 10.0, 0.5),
        scored(&g, "g1", 5.0, 0.9),
        scored(&f, "f2", 30.0, 0.6),
        scored(&g, "g2", 50.0, 0.05),
    ];
    let frontiers = orchestrator.pareto(&cores)?;
    assert_eq!(launcher.count("pareto"), 1);
    assert_eq!(frontiers.groups.len(), 2);
    assert_eq!(frontiers.groups[0], (f, vec![(10.0, 0.5)]));
    assert_eq!(frontiers.groups[1], (g, vec![(5.0, 0.9), (50.0, 0.05)]));
    // one variant per program, totals summed
    assert_eq!(
        frontiers.batch,
        vec![(15.0, 0.5 + 0.9), (60.0, 0.5 + 0.05)]
    );
    Ok(())
}

#[test]
fn failed_desugar_restores_the_input_core() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&["cos-variant"]);
    let mut orchestrator = orchestrator(dir.path(), &launcher);

    let inputs = vec![input("sin"), input("cos"), input("tan")];
    let variants: Vec<ProgramCore> = inputs
        .iter()
        .map(|core| {
            let name = format!("{}-variant", core.name);
            ProgramCore::new(
                format!("(FPCore (x) :name \"{}\" (+ x 0))", name),
                core.key().clone(),
                name,
                1,
            )
        })
        .collect();

    let desugared = orchestrator.desugar(&inputs, &variants)?;
    assert_eq!(desugared.cores.len(), 3);
    assert_eq!(desugared.failed, vec!["cos-variant".to_string()]);
    assert_eq!(desugared.cores[1], inputs[1]);
    assert_eq!(desugared.cores[0].name, "sin-variant");
    assert_eq!(desugared.cores[0].key(), inputs[0].key());
    assert_eq!(desugared.cores[2].name, "tan-variant");
    assert_eq!(launcher.count("desugar"), 3);
    assert_eq!(launcher.sessions_opened(), 1);
    Ok(())
}

#[test]
fn cross_platform_run_desugars_and_compares_frontiers() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let mut orchestrator = orchestrator(dir.path(), &launcher);

    let summary = orchestrator.run_batch(vec![input("sin")], Some("c"))?;
    assert!(summary.stages.contains(&Stage::Desugar));
    assert!(summary.desugar_failures.is_empty());
    assert_eq!(summary.timings.len(), 2);
    assert!(summary.report_dir.join("baseline_report.json").exists());

    let improved: Vec<_> = launcher
        .requests()
        .into_iter()
        .filter(|exchange| exchange.request.starts_with("(improve "))
        .collect();
    assert_eq!(improved.len(), 1);
    assert_eq!(improved[0].platform, "c");
    assert_eq!(orchestrator.cache().count_variants(), 2);
    Ok(())
}

#[test]
fn resized_samples_are_regenerated() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let cores = vec![input("sin")];

    let first = orchestrator(dir.path(), &launcher).sample(&cores)?;
    assert_eq!(first.samples[0].as_ref().unwrap().num_points(), 4);

    let mut resized = orchestrator_with(
        RunnerConfig {
            num_points: 6,
            ..config(dir.path())
        },
        &launcher,
        Arc::new(CountingBackend),
    );
    let second = resized.sample(&cores)?;
    assert_eq!(launcher.count("sample"), 2);
    assert_eq!(second.cached, 0);
    assert_eq!(second.samples[0].as_ref().unwrap().num_points(), 6);
    assert_eq!(resized.cache().get_sample(cores[0].key()).unwrap().num_points, 6);
    Ok(())
}

#[test]
fn cores_without_a_sample_are_not_benchmarked() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = optimizer(&[]);
    let mut orchestrator = orchestrator(dir.path(), &launcher);

    let sampled = input("sin");
    let unsampled = input("cos");
    let table = SampleTable::new(
        &[sampled.clone(), unsampled.clone()],
        &[Some(Sample::new(vec![vec![1.0]], vec![None])?), None],
    );

    let drivers = orchestrator.generate_drivers(vec![sampled, unsampled], &table)?;
    assert_eq!(drivers.skipped, vec!["cos".to_string()]);
    assert_eq!(drivers.artifacts.len(), 1);
    assert!(drivers.cores[0].compiled.is_some());
    assert!(drivers.artifacts[0].dir.ends_with("0"));
    Ok(())
}

#[test]
fn read_assigns_keys_per_line() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = dir.path().join("bench.fpcore");
    fs::write(&corpus, "ignored by the scripted optimizer\n")?;
    let launcher = optimizer(&[]);
    let mut orchestrator = orchestrator(dir.path(), &launcher);

    let cores = orchestrator.read(&corpus)?;
    assert_eq!(cores.len(), 2);
    assert_eq!(cores[0].name, "first");
    assert_eq!(cores[1].name, "second");
    assert_ne!(cores[0].key(), cores[1].key());

    let err = orchestrator.read(&dir.path().join("missing")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingPath(_))
    ));
    Ok(())
}

#[test]
fn unknown_backend_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let config = RunnerConfig {
        backend: "fortran".to_string(),
        ..config(dir.path())
    };
    let err = Orchestrator::from_config(config).err().unwrap();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::UnknownBackend("fortran".to_string()))
    );
}

// SPDX-License-Identifier: Apache-2.0

//! Demo search loop over the built-in sample programs: generate, mutate,
//! locally search and (optionally) concolically patch test cases under a
//! branch-coverage objective, then minimize the best one and dump it with a
//! JSON report.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::Builder;

use testsynth_dse::avm::AvmSolver;
use testsynth_dse::engine::{dse_local_search, DseConfig, SidePool};
use testsynth_dse::solver::CachingSolver;
use testsynth_exec::harness::{RunSpec, TestExecutor};
use testsynth_exec::objective::{FitnessObjective, MinimizingObjective};
use testsynth_exec::registry::PutRegistry;
use testsynth_exec::test_utils::{account_put, triangle_put};
use testsynth_search::insert::{delete_random_statement, insert_random_call};
use testsynth_search::local::{search_test, LocalSearchConfig};
use testsynth_search::minimize::minimize_to_fixpoint;
use testsynth_search::mutate::{mutate_random_statement, MutationConfig};
use testsynth_search::pool::ConstantPool;
use testsynth_tc::test::TestCase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SamplePut {
    /// Stateful `Account` class with deposit/withdraw guards.
    Account,
    /// The classic triangle classifier; equilateral needs the concolic step.
    Triangle,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct CliArgs {
    /// Sample program to search against.
    #[clap(long, value_enum, default_value_t = SamplePut::Triangle)]
    put: SamplePut,

    /// Number of search iterations to perform.
    #[clap(short = 'n', long, value_parser, default_value_t = 200)]
    iters: u64,

    /// Random seed
    #[clap(short = 'S', long, value_parser, default_value_t = 1)]
    seed: u64,

    /// Wall-clock budget per test execution, in milliseconds.
    #[clap(long, default_value_t = 250)]
    budget_ms: u64,

    /// Run a concolic patch round every N iterations; 0 disables it.
    #[clap(long, default_value_t = 25)]
    dse_every: u64,

    /// Output file or directory. If a directory, 'best.tc' and 'report.json'
    /// are saved there. If not specified, output goes to a new temporary
    /// directory.
    #[clap(short, long, value_parser)]
    output: Option<String>,

    /// Print every iteration and accepted move (for debugging stalls)
    #[clap(long)]
    verbose: bool,
}

#[derive(Debug, serde::Serialize)]
struct BranchReport {
    id: u32,
    true_side: bool,
    false_side: bool,
}

#[derive(Debug, serde::Serialize)]
struct SearchReport {
    put: String,
    iters_run: u64,
    interrupted: bool,
    best_score: f64,
    best_len: usize,
    minimized_away: usize,
    goals_covered: usize,
    branches: Vec<BranchReport>,
    dse_attempts: usize,
    dse_solved: usize,
    dse_improvements: usize,
    solver_cache_hits: u64,
    solver_cache_misses: u64,
}

/// Coverage-driven score over one execution: every covered branch side
/// subtracts a whole point, every reached-but-uncovered side adds its
/// normalized distance. Lower is better.
fn coverage_score(executor: &mut TestExecutor, spec: &RunSpec, test: &TestCase) -> f64 {
    let result = match executor.run(test, spec) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("execution engine error, scoring worst: {}", e);
            return f64::INFINITY;
        }
    };
    let mut score = 0.0;
    let ids: Vec<u32> = result.trace.branch_ids().collect();
    for id in ids {
        for dist in [
            result.trace.distance_true(id),
            result.trace.distance_false(id),
        ] {
            match dist {
                Some(d) if d == 0.0 => score -= 1.0,
                Some(d) if d.is_finite() => score += d / (d + 1.0),
                _ => {}
            }
        }
    }
    score
}

/// Records fully-covered branch sides on the test case itself, goal id
/// `2 * branch + side`. The set survives cloning, so descendants remember
/// what their lineage has already covered.
fn stamp_covered_goals(
    executor: &mut TestExecutor,
    spec: &RunSpec,
    test: &mut TestCase,
) -> Result<()> {
    let result = executor.run(test, spec)?;
    let ids: Vec<u32> = result.trace.branch_ids().collect();
    for id in ids {
        if result.trace.distance_true(id) == Some(0.0) {
            test.add_covered_goal(u64::from(id) * 2);
        }
        if result.trace.distance_false(id) == Some(0.0) {
            test.add_covered_goal(u64::from(id) * 2 + 1);
        }
    }
    Ok(())
}

fn registry_for(put: SamplePut) -> Arc<PutRegistry> {
    match put {
        SamplePut::Account => account_put().registry,
        SamplePut::Triangle => triangle_put().registry,
    }
}

fn main() -> Result<()> {
    let _ = env_logger::try_init();

    let cli = CliArgs::parse();
    println!("Search driver started with args: {:?}", cli);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        println!("\nCtrl+C received, attempting to shut down gracefully...");
    })
    .expect("Error setting Ctrl-C handler");

    let (output_tc_path, output_report_path, _temp_dir_holder): (
        PathBuf,
        PathBuf,
        Option<tempfile::TempDir>,
    ) = match &cli.output {
        Some(path_str) => {
            let p = PathBuf::from(path_str);
            if p.is_dir() || path_str.ends_with('/') {
                fs::create_dir_all(&p)?;
                (p.join("best.tc"), p.join("report.json"), None)
            } else {
                if let Some(parent) = p.parent() {
                    if !parent.exists() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let report_p = p.with_extension("report.json");
                (p, report_p, None)
            }
        }
        None => {
            let temp_dir = Builder::new().prefix("testsynth_output_").tempdir()?;
            println!(
                "No output path specified, using temp dir: {}",
                temp_dir.path().display()
            );
            let base = temp_dir.path();
            (
                base.join("best.tc"),
                base.join("report.json"),
                Some(temp_dir),
            )
        }
    };

    let registry = registry_for(cli.put);
    let catalog = registry.catalog_arc();

    let run_spec = RunSpec::default()
        .with_budget(Duration::from_millis(cli.budget_ms))
        .with_keep_going(true);
    let mut fitness_exec = TestExecutor::new(registry.clone());
    let fitness_spec = run_spec.clone();
    let mut objective = MinimizingObjective::new(move |t: &TestCase| {
        coverage_score(&mut fitness_exec, &fitness_spec, t)
    });

    let mut rng = Pcg64Mcg::seed_from_u64(cli.seed);
    let mut pool = ConstantPool::with_defaults();
    let mutation_cfg = MutationConfig::default();
    let local_cfg = LocalSearchConfig::default();

    let mut dse_exec = TestExecutor::new(registry.clone());
    let mut solver = CachingSolver::new(AvmSolver::new(cli.seed));
    let mut side_pool = SidePool::new(32);
    let dse_cfg = DseConfig::default();
    let mut dse_attempts = 0;
    let mut dse_solved = 0;
    let mut dse_improvements = 0;

    let mut best = TestCase::new();
    objective.has_not_worsened(&best);

    let mut iters_run = 0;
    for iter in 0..cli.iters {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        iters_run = iter + 1;

        let mut candidate = best.clone();
        let roll: f64 = rng.gen();
        let moved = if roll < 0.4 || candidate.is_empty() {
            insert_random_call(&catalog, &mut candidate, &pool, &mutation_cfg, &mut rng).is_some()
        } else if roll < 0.85 {
            mutate_random_statement(&catalog, &mut candidate, &pool, &mutation_cfg, &mut rng)
        } else {
            delete_random_statement(&catalog, &mut candidate, &mut rng).is_some()
        };
        if !moved {
            continue;
        }
        if objective.has_improved(&candidate) {
            if cli.verbose {
                println!(
                    "iter {}: accepted move, score {} len {}",
                    iter,
                    objective.best(),
                    candidate.len()
                );
            }
            pool.observe_test(&candidate);
            stamp_covered_goals(&mut dse_exec, &run_spec, &mut candidate)?;
            best = candidate;
        }

        // Periodic exploitation phases on the incumbent.
        if iter % 10 == 9 {
            search_test(&catalog, &mut best, &mut objective, &local_cfg);
        }
        if cli.dse_every != 0 && iter % cli.dse_every == cli.dse_every - 1 && !best.is_empty() {
            let outcome = dse_local_search(
                &mut dse_exec,
                &mut best,
                &mut objective,
                None,
                &mut solver,
                &mut side_pool,
                &dse_cfg,
            )?;
            dse_attempts += outcome.attempts;
            dse_solved += outcome.solved;
            if outcome.improved {
                dse_improvements += 1;
                pool.observe_test(&best);
                stamp_covered_goals(&mut dse_exec, &run_spec, &mut best)?;
                if cli.verbose {
                    println!("iter {}: concolic patch, score {}", iter, objective.best());
                }
            }
            // Parked variants are cheap second chances.
            while let Some(parked) = side_pool.pop() {
                if objective.has_improved(&parked) {
                    pool.observe_test(&parked);
                    best = parked;
                    stamp_covered_goals(&mut dse_exec, &run_spec, &mut best)?;
                }
            }
        }
    }

    if !running.load(Ordering::SeqCst) {
        println!("Search was interrupted.");
    }

    let minimized_away = minimize_to_fixpoint(&catalog, &mut best, &mut objective);
    let best_score = objective.best();
    println!(
        "Search finished. Best score {} over {} statements ({} minimized away).",
        best_score,
        best.len(),
        minimized_away
    );

    let mut report_exec = TestExecutor::new(registry.clone());
    let final_result = report_exec.run(&best, &run_spec)?;
    let ids: BTreeSet<u32> = final_result.trace.branch_ids().collect();
    let branches: Vec<BranchReport> = ids
        .into_iter()
        .map(|id| BranchReport {
            id,
            true_side: final_result.trace.distance_true(id) == Some(0.0),
            false_side: final_result.trace.distance_false(id) == Some(0.0),
        })
        .collect();

    let report = SearchReport {
        put: format!("{:?}", cli.put).to_lowercase(),
        iters_run,
        interrupted: !running.load(Ordering::SeqCst),
        best_score,
        best_len: best.len(),
        minimized_away,
        goals_covered: best.covered_goals().len(),
        branches,
        dse_attempts,
        dse_solved,
        dse_improvements,
        solver_cache_hits: solver.hits(),
        solver_cache_misses: solver.misses(),
    };

    println!("Dumping best test as text to: {}", output_tc_path.display());
    let mut f_tc = fs::File::create(&output_tc_path)?;
    f_tc.write_all(best.to_string().as_bytes())?;

    println!("Dumping report as JSON to: {}", output_report_path.display());
    let mut f_report = fs::File::create(&output_report_path)?;
    let report_json = serde_json::to_string_pretty(&report)?;
    f_report.write_all(report_json.as_bytes())?;
    println!(
        "Successfully wrote report to {}",
        output_report_path.display()
    );

    Ok(())
}

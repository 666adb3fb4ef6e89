use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rspn::repr::assignment::Query;
use rspn::repr::spn::Spn;
use rspn::solver::{approx, exact};
use serde_json::json;
use std::fs;
use std::time::{Duration, Instant};

/// Driver that runs one MPE solver against a network file and reports the
/// best explanation found as JSON
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// An input sum-product network in the line-oriented text format
    #[clap(short, long, value_parser)]
    file: String,

    /// Solver to run
    /// Options:
    ///    bt:   bottom-up max-product traversal
    ///    ng:   naive greedy descent
    ///    amap: argmax-product forward pass
    ///    bs:   beam search
    ///    kbt:  k-best backtracking
    ///    mc:   exact, marginal checking
    ///    fc:   exact, forward checking
    ///    fco:  exact, forward checking + ordering
    ///    fcos: exact, forward checking + ordering + staging
    #[clap(short, long, value_parser)]
    solver: String,

    /// Optional query string over {0,1,?,*}; the network is conditioned on
    /// it before solving
    #[clap(short, long, value_parser)]
    query: Option<String>,

    /// Baseline log-probability handed to the exact solvers
    #[clap(short, long, value_parser, default_value = "-inf", allow_hyphen_values = true)]
    baseline: f64,

    /// Wall-clock budget in seconds
    #[clap(short, long, value_parser, default_value_t = 60)]
    timeout: u64,

    /// Beam width for beam search
    #[clap(long, value_parser, default_value_t = 10)]
    beam_size: usize,

    /// K for the k-best solver
    #[clap(short, long, value_parser, default_value_t = 10)]
    k: usize,

    /// Seed for the sampling-based solvers
    #[clap(long, value_parser, default_value_t = 0)]
    seed: u64,

    /// File to write the JSON record to, if any
    #[clap(short, long, value_parser, default_value = "")]
    output: String,
}

fn main() {
    let args = Args::parse();
    let mut spn = Spn::from_file(&args.file);
    if let Some(q) = &args.query {
        spn = spn.condition(&Query::from_string(q));
    }
    let timeout = Duration::from_secs(args.timeout);

    let start = Instant::now();
    let (p, x) = match args.solver.as_str() {
        "bt" => {
            let x = approx::max_product(&spn);
            (spn.eval_total(&x), json!(x))
        }
        "ng" => {
            let x = approx::naive_greedy(&spn);
            (spn.eval_total(&x), json!(x))
        }
        "amap" => match approx::amap(&spn, timeout) {
            Some((x, p)) => (p, json!(x.as_slice())),
            None => (f64::NAN, json!(null)),
        },
        "bs" => {
            let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
            let best = approx::beam_search(&spn, args.beam_size, timeout, &mut rng);
            (best.p, json!(best.x))
        }
        "kbt" => match approx::k_best(&spn, args.k, timeout) {
            Some(best) => (best.p, json!(best.x)),
            None => (f64::NAN, json!(null)),
        },
        "mc" => (exact::marginal_checking(&spn, args.baseline, timeout), json!(null)),
        "fc" => (exact::forward_checking(&spn, args.baseline, timeout), json!(null)),
        "fco" => (
            exact::forward_checking_ordering(&spn, args.baseline, timeout),
            json!(null),
        ),
        "fcos" => (
            exact::forward_checking_staging(&spn, args.baseline, timeout),
            json!(null),
        ),
        other => panic!("unknown solver {:?}", other),
    };
    let record = json!({
        "solver": args.solver,
        "p": p,
        "x": x,
        "time_in_sec": start.elapsed().as_secs_f64(),
    });
    println!("{}", record);
    if !args.output.is_empty() {
        fs::write(&args.output, serde_json::to_string_pretty(&record).unwrap())
            .expect("failed to write output file");
    }
}

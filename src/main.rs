use motifscape::observer::RecordAdapter;
use motifscape::{
    build_motif_population, lipschitz, propagation, rugosity, ComputeType, InputRange,
    LandscapeSampler, MotifModel, MotifSpec, NormType, SearchConfig, SimilaritySearch,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_POINTS: usize = 41;
const DEFAULT_SEED: u64 = 0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" || args[1] == "help" {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "landscape" => run_landscape(&args[2..]),
        "robustness" => run_robustness(&args[2..]),
        "search" => run_search(&args[2..]),
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    }
}

fn print_help() {
    println!("motifscape - signed neural motif landscapes\n");
    println!("Usage:");
    println!("  motifscape landscape <descriptor> [points]");
    println!("  motifscape robustness <descriptor> [points]");
    println!("  motifscape search <source-descriptor> <target-label> [pool-size] [points]");
    println!("  motifscape help\n");
    println!("Descriptors look like collider-2-relu-sum#0 or coherent-loop-1-tanh_sigmoid-sum_max#3;");
    println!("the #index picks a member of the seed-{DEFAULT_SEED} population.");
    println!("Set RUST_LOG=debug to trace search convergence.");
}

/// Resolve a descriptor to the `#index`-th member of its population.
fn model_from_descriptor(descriptor: &str) -> Result<MotifModel, Box<dyn std::error::Error>> {
    let (spec, index) = MotifSpec::parse_descriptor(descriptor)?;
    let mut pop = build_motif_population(&spec, index + 1, None, None, DEFAULT_SEED)?;
    pop.pop().ok_or_else(|| "empty population".into())
}

fn parse_points(arg: Option<&String>) -> Result<usize, Box<dyn std::error::Error>> {
    match arg {
        Some(s) => Ok(s.parse::<usize>().map_err(|_| format!("bad point count '{s}'"))?),
        None => Ok(DEFAULT_POINTS),
    }
}

fn require<'a>(args: &'a [String], i: usize, what: &str) -> Result<&'a str, Box<dyn std::error::Error>> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {what}").into())
}

fn run_landscape(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let model = model_from_descriptor(require(args, 0, "descriptor")?)?;
    let points = parse_points(args.get(1))?;
    let sampler = LandscapeSampler::new(InputRange::default(), points)?;
    let l = sampler.sample(&model)?;

    println!("{}", model.describe());
    println!("grid: {points}x{points} over [-1, 1], spacing {:.4}", l.spacing());
    for (c, grid) in l.channels().iter().enumerate() {
        println!(
            "channel {c}: min {:+.4} max {:+.4} center {:+.4}",
            grid.min(),
            grid.max(),
            grid.get(points / 2, points / 2)
        );
    }
    Ok(())
}

fn run_robustness(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let model = model_from_descriptor(require(args, 0, "descriptor")?)?;
    let points = parse_points(args.get(1))?;
    let range = InputRange::default();

    println!("{}", model.describe());
    for norm in [NormType::L1, NormType::L2, NormType::LInf] {
        let k = lipschitz(&model, range, points, norm.name())?;
        println!("lipschitz[{}]: {k:.6}", norm.name());
    }
    let r = rugosity(&model, range, points)?;
    println!(
        "rugosity: mean {:.6} median {:.6} max {:.6}",
        r.mean, r.median, r.max
    );
    let p = propagation(&model, range, points, ComputeType::Max.name())?;
    let last = points - 1;
    println!(
        "propagation[max]: (1,1) {:.4} (mid,mid) {:.4} (end,end) {:.4}",
        p.get(1, 1),
        p.get(last / 2, last / 2),
        p.get(last, last)
    );
    Ok(())
}

fn run_search(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let source = model_from_descriptor(require(args, 0, "source descriptor")?)?;
    let (target_spec, _) = MotifSpec::parse_descriptor(require(args, 1, "target label")?)?;
    let pool_size = match args.get(2) {
        Some(s) => s.parse::<usize>().map_err(|_| format!("bad pool size '{s}'"))?,
        None => 8,
    };
    let points = match args.get(3) {
        Some(_) => parse_points(args.get(3))?,
        None => 21,
    };
    let pool = build_motif_population(&target_spec, pool_size, None, None, DEFAULT_SEED + 1)?;

    let cfg = SearchConfig::default().with_grid(InputRange::default(), points);
    let on_progress = |current: usize, total: usize, extra: &str| {
        if current > 0 && extra.starts_with("outer") {
            eprintln!("[{current}/{total}] {extra}");
        }
    };
    let search = SimilaritySearch::new(cfg)?.with_progress(&on_progress);
    let record = search.max_min_search(&source, &pool)?;

    match RecordAdapter::new(&record).summary() {
        Some(s) => {
            println!("source: {}", s.source);
            println!("nearest target family: {}", s.final_target);
            println!(
                "outer iterations: {} (inner total {}), termination {:?}",
                s.outer_iterations, s.inner_iterations, s.termination
            );
            println!(
                "outer loss: {:.6e} -> {:.6e}",
                s.first_outer_loss, s.final_outer_loss
            );
        }
        None => println!("no iterations recorded"),
    }
    if let Some(last) = record.last() {
        println!("final source: {}", last.source.describe());
    }
    Ok(())
}

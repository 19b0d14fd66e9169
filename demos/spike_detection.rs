//! Example: Spike Detection
//!
//! Builds the four-stage spike detection pipeline (memory reader, moving
//! average, spike filter, memory writer) and generates it for both targets.
//!
//! Run with: cargo run --example spike_detection

use dataflow_codegen::{
    ArtifactOutcome, CodegenResult, DispatchPolicy, GatherPolicy, Operator, OperatorKind, Pipeline,
    PipelineConfig, RewriteOptions, Target, TransferMode,
};

const WIN_DIM: usize = 16;

fn build(dest: &str, target: Target, mode: TransferMode) -> CodegenResult<Pipeline> {
    let config = PipelineConfig::new(dest, "input_t", target)
        .with_transfer_mode(mode)
        .with_constant("WIN_DIM", WIN_DIM)
        .with_constant("THRESHOLD", "0.025f");
    let mut pipeline = Pipeline::new(config);

    pipeline.add(Operator::new("mr", 2, OperatorKind::MemoryReader, GatherPolicy::None, DispatchPolicy::KB)?)?;

    let mut average = Operator::new("average_calculator", 2, OperatorKind::Map, GatherPolicy::LB, DispatchPolicy::RR)?
        .with_output_type("tuple_t");
    average.add_private_buffer("unsigned int", "sizes", &[WIN_DIM], None, false, None)?;
    average.add_local_buffer("float", "windows", &[WIN_DIM, WIN_DIM], None, None)?;
    pipeline.add(average)?;

    pipeline.add(Operator::new("spike_detector", 2, OperatorKind::Filter, GatherPolicy::LB, DispatchPolicy::LB)?)?;
    pipeline.add(Operator::new("mw", 2, OperatorKind::MemoryWriter, GatherPolicy::LB, DispatchPolicy::None)?)?;
    Ok(pipeline)
}

fn run(dest: &str, target: Target, mode: TransferMode) -> CodegenResult<()> {
    println!("Target: {} (transfer mode {})", target, mode);
    let mut pipeline = build(dest, target, mode)?;
    let report = pipeline.generate_code(&RewriteOptions::default())?;

    for record in &report.artifacts {
        println!("  {:>9}  {}", record.outcome, record.path.display());
    }
    println!(
        "{} generated, {} kept\n",
        report.count(ArtifactOutcome::Generated),
        report.count(ArtifactOutcome::Skipped)
    );
    Ok(())
}

fn main() {
    println!("=== Spike Detection Example ===\n");

    if let Err(e) = run("build/intel/sd", Target::Intel, TransferMode::Copy) {
        eprintln!("Error: {}", e);
    }
    if let Err(e) = run("build/xilinx/sd", Target::Xilinx, TransferMode::Host) {
        eprintln!("Error: {}", e);
    }

    // Second run keeps every artifact (hand edits survive)
    println!("Re-running the Intel generation without rewrite flags:");
    if let Err(e) = run("build/intel/sd", Target::Intel, TransferMode::Copy) {
        eprintln!("Error: {}", e);
    }
}

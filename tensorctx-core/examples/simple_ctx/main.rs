use std::time::Instant;

use tensorctx_core::{CapacityPlanner, Context, ContextParams, DType, ErrorContext, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let n_threads = match std::env::var("TENSORCTX_THREADS") {
        Ok(v) => v
            .parse::<i32>()
            .context("TENSORCTX_THREADS must be an integer")?,
        Err(_) => 1,
    };

    let mut plan = CapacityPlanner::new();
    plan.tensor(DType::F32, &[4, 2])
        .tensor(DType::F32, &[3, 2])
        .tensor(DType::F32, &[4, 3])
        .graph();
    let mut ctx = Context::new(ContextParams::from_plan(&plan))?;

    let a = ctx.new_tensor_2d(DType::F32, 4, 2)?;
    let b = ctx.new_tensor_2d(DType::F32, 3, 2)?;
    ctx.set_name(a, "a")?;
    ctx.set_name(b, "b")?;
    ctx.load(a, &[2f32, 8., 5., 1., 4., 2., 8., 6.])?;
    ctx.load(b, &[10f32, 5., 9., 9., 5., 4.])?;

    let result = ctx.mul_mat(a, b)?;
    let graph = ctx.build_forward(result)?;

    let start = Instant::now();
    let out = ctx.compute(&graph, n_threads)?;
    let elapsed = start.elapsed();

    println!("{}", graph.to_dot(&ctx)?);
    println!("mul_mat (a * b^T) with {n_threads} threads in {elapsed:?}:");
    for row in ctx.to_vec2::<f32>(out)? {
        let row: Vec<String> = row.iter().map(|v| format!("{v:.2}")).collect();
        println!("  [ {} ]", row.join(" "));
    }
    println!("arena: {} of {} bytes used", ctx.used(), ctx.capacity());

    ctx.free();
    Ok(())
}

#![no_main]
use libfuzzer_sys::fuzz_target;

use trace_regalloc::{Options, RegAllocError, RegEnv};
use tracera::fuzzing::NUM_REAL_REGS_PER_RC;
use tracera::test_framework::{self as ir, CompareError};

static mut COUNTER_GEN: usize = 0;
static mut COUNTER_OK: usize = 0;

fuzz_target!(|func: ir::Func| {
    let (num_gen, num_ok) = unsafe {
        COUNTER_GEN += 1;
        (COUNTER_GEN, COUNTER_OK)
    };

    println!(
        "=== status: #ok/#total: {}/{} == {} ",
        num_ok,
        num_gen,
        100.0 * (num_ok as f64) / (num_gen as f64)
    );

    let env = RegEnv::new(ir::make_universe(NUM_REAL_REGS_PER_RC, NUM_REAL_REGS_PER_RC));
    let args: Vec<i64> = (0..func.num_args as i64).map(|n| n * 7 - 3).collect();

    let before = match ir::run_func(&func, &args, &env.rru, ir::DEFAULT_MAX_STEPS) {
        Ok(before) => before,
        Err(err) => {
            println!("can't run the generated function: {}", err);
            return;
        }
    };

    for never_spill_constants in &[false, true] {
        let opts = Options {
            run_checker: true,
            never_spill_constants: *never_spill_constants,
        };
        for traces in vec![ir::linear_traces(&func), ir::block_traces(&func)] {
            match ir::allocate_and_compare(&func, traces, &env, &opts, &args, &before) {
                Ok(_) => {}
                Err(CompareError::Alloc(RegAllocError::Bailout(msg))) => {
                    println!("bailout: {}", msg);
                    return;
                }
                Err(err) => {
                    println!("{:?}", func);
                    panic!("fuzz_targets/tracera.rs: {}", err);
                }
            }
        }
    }

    unsafe {
        COUNTER_OK += 1;
    }
});

//! Final one-line-per-section stdout report, matching the original tool's
//! `TOTALS`/`TRAFFIC`/`CPUSTAT`/`TIMING` format.

use crate::aggregator::{Rates, Totals};
use crate::cpu::CpuStats;
use std::time::Duration;

pub(crate) fn print(totals: &Totals, rates: &Rates, cpu: &CpuStats, elapsed: Duration, keep_alive: bool) {
    let num_requests = totals.num_success + totals.num_fail;
    println!(
        "TOTALS:  {} connect, {} requests, {} success, {} fail, {} ({}) real concurrency, keepalive {}",
        totals.num_connect,
        num_requests,
        totals.num_success,
        totals.num_fail,
        totals.real_concurrency,
        totals.real_concurrency_threshold_hit,
        keep_alive as u8,
    );

    let avg_bytes = if totals.num_success > 0 { totals.num_bytes_received / totals.num_success } else { 0 };
    let avg_overhead = if totals.num_success > 0 { totals.num_overhead_received / totals.num_success } else { 0 };
    println!(
        "TRAFFIC: {avg_bytes} avg bytes, {avg_overhead} avg overhead, {} bytes, {} overhead",
        totals.num_bytes_received, totals.num_overhead_received,
    );

    println!("CPUSTAT:  max,{:.1},min,{:.1},avg,{:.1}", cpu.max, cpu.min, cpu.avg);

    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    if rates.rps > 100.0 {
        println!(
            "TIMING:  {secs}.{millis:03} seconds, {} rps, {} kbps, {:.1} ms avg req time",
            rates.rps as u64, rates.kbps, rates.avg_req_time.as_secs_f64() * 1000.0,
        );
    } else {
        println!(
            "TIMING:  {secs}.{millis:03} seconds, {:.2} rps, {} kbps, {:.1} ms avg req time",
            rates.rps, rates.kbps, rates.avg_req_time.as_secs_f64() * 1000.0,
        );
    }
}

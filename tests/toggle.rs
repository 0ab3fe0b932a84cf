mod common;

use std::time::Duration;
use tokio::time::Instant;

use boot_sweep::{
    cancel::{ cancel_pair, Cancel },
    orchestrator::RunError,
    toggle::{ run_toggle, ToggleSettings },
};
use common::{ mv, FakeSupply, SupplyCall };

#[tokio::test(start_paused = true)]
async fn toggles_each_level_then_switches_off()
{
    let mut supply = FakeSupply::default();
    let settings = ToggleSettings {
        levels: vec![mv(1_500), mv(3_000)],
        rounds: Some(1),
        ..ToggleSettings::default()
    };
    let started = Instant::now();

    let rounds = run_toggle(&mut supply, &settings, &Cancel::never()).await.unwrap();

    assert_eq!(rounds, 1);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(
        supply.calls,
        vec![
            SupplyCall::SetVoltage(mv(1_500)),
            SupplyCall::Output(true),
            SupplyCall::Output(false),
            SupplyCall::SetVoltage(mv(3_000)),
            SupplyCall::Output(true),
            SupplyCall::Output(false),
            SupplyCall::Output(false),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn unlimited_toggling_stops_on_cancel()
{
    let mut supply = FakeSupply::default();
    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(4)).await;
        handle.cancel();
    });

    let result = run_toggle(&mut supply, &ToggleSettings::default(), &cancel).await;

    assert!(matches!(result, Err(RunError::Cancelled)));
    // cancelled in the off interval after the first level
    assert_eq!(supply.calls.len(), 4);
    assert_eq!(supply.last_call(), Some(&SupplyCall::Output(false)));
}

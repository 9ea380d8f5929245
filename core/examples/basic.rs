//! Basic circuit breaker usage example

use resilience_machines::{CircuitBreaker, Context, Error, Func, Runner};
use std::time::Duration;

fn payment(ok: bool) -> Func {
    Func::new(move |_ctx| async move {
        if ok {
            Ok(())
        } else {
            Err(Error::execution("payment gateway unavailable"))
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Circuit Breaker Basic Example ===\n");

    let circuit = CircuitBreaker::builder("payment_api")
        .error_percent_threshold(50)
        .minimum_requests(4)
        .open_wait(Duration::from_millis(500))
        .success_threshold(2)
        .on_open(|name| println!("🔴 Circuit '{}' opened!", name))
        .on_close(|name| println!("🟢 Circuit '{}' closed!", name))
        .on_half_open(|name| println!("🟡 Circuit '{}' half-open, testing...", name))
        .build()?;

    println!("Initial state: {}\n", circuit.state());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.run(Context::new(), payment(true)).await {
            Ok(()) => println!("✓ Payment {}", i),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", circuit.state());

    println!("--- Triggering failures ---");
    for _ in 1..=2 {
        if let Err(e) = circuit.run(Context::new(), payment(false)).await {
            println!("✗ {}", e);
        }
    }
    println!("State: {} (circuit opened)\n", circuit.state());

    println!("--- Attempting call while open ---");
    if let Err(e) = circuit.run(Context::new(), payment(true)).await {
        println!("✗ {}", e);
    }
    println!();

    println!("--- Waiting for the open state to expire ---");
    tokio::time::sleep(Duration::from_millis(500)).await;
    for i in 1..=2 {
        match circuit.run(Context::new(), payment(true)).await {
            Ok(()) => println!("✓ Probe {} succeeded", i),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {}\n", circuit.state());

    println!("--- Resetting circuit ---");
    circuit.reset();
    let window = circuit.window_snapshot();
    println!(
        "State after reset: {} ({} calls in window)",
        circuit.state(),
        window.total
    );

    Ok(())
}

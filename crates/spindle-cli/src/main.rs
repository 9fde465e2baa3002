use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use spindle_core::{AsyncQueueWorker, InMemoryBlockingQueue, LoopConfig, LoopExit};
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn load_config() -> Result<LoopConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(LoopConfig::from_json_str(&json)?)
        }
        None => Ok(LoopConfig {
            name: Some("demo-worker".to_string()),
            interval_ms: 20,
            continue_on_error: true,
        }),
    }
}

fn print_status<T: Send + 'static>(label: &str, worker: &AsyncQueueWorker<T>) {
    match serde_json::to_string(&worker.status()) {
        Ok(json) => println!("{label}: {json}"),
        Err(e) => println!("{label}: status unavailable ({e})"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("spindle_core=debug,info")),
        )
        .init();

    let config = load_config()?;
    info!(?config, "config loaded");

    // (A) bounded queue と worker を用意（偶数は成功、奇数は item error、数値以外は error）
    let queue = Arc::new(InMemoryBlockingQueue::bounded(16)?);
    let rejected = Arc::new(AtomicU64::new(0));

    let worker = AsyncQueueWorker::builder(queue, |item: &String| {
        let n: i64 = item.trim().parse()?;
        println!("handled: {n}");
        Ok(n % 2 == 0)
    })
    .config(&config)
    .with_item_error_handler({
        let rejected = Arc::clone(&rejected);
        move |item| {
            rejected.fetch_add(1, Ordering::Relaxed);
            println!("rejected odd item: {item}");
        }
    })
    .with_error_handler(|ctrl, err| {
        ctrl.log_error(err.as_ref());
        ctrl.pause_for(std::time::Duration::from_millis(300));
    })
    .build()?;

    // (B) 起動して投入
    worker.start()?;
    for item in ["1", "2", "three", "4", "5"] {
        worker.add(item.to_string())?;
    }
    sleep(Duration::from_millis(600)).await;
    print_status("after first batch", &worker);

    // (C) 2 件だけ処理して止まる
    worker.pause_after_loops(2)?;
    for item in ["6", "7", "8", "9"] {
        worker.add(item.to_string())?;
    }
    sleep(Duration::from_millis(300)).await;
    print_status("after pause_after_loops(2)", &worker);

    worker.wake();
    sleep(Duration::from_millis(300)).await;
    print_status("after wake", &worker);

    // (D) close して停止を待つ
    worker.close();
    match worker.stopped().await {
        LoopExit::Closed => println!("worker closed"),
        LoopExit::Failed(e) => println!("worker failed: {e}"),
    }
    println!(
        "rejected items: {}",
        rejected.load(Ordering::Relaxed)
    );
    print_status("final", &worker);
    Ok(())
}

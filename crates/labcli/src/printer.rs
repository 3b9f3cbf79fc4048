use labcore::{ExecutionEvent, ProcessEvent};
use labruntime::{ExperimentRecord, Process, RunState};
use tokio::sync::broadcast;

pub fn state_label(state: RunState) -> &'static str {
    if state.is_running {
        "running"
    } else if state.is_succeeded() {
        "succeeded"
    } else if state.is_failed() {
        "failed"
    } else {
        "draft"
    }
}

fn percent(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        (value / max * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub async fn print_events(mut events: broadcast::Receiver<ExecutionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                println!("     ⚠️  {} events dropped", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ExecutionEvent::ExperimentStarted { title, .. } => {
                println!("▶️  Experiment started: {}", title);
            }
            ExecutionEvent::ProcessStarted {
                instance_path,
                process_type,
                ..
            } => {
                println!("  ⚡ Starting process: {} ({})", instance_path, process_type);
            }
            ExecutionEvent::ProcessCompleted {
                instance_path,
                duration_ms,
                ..
            } => {
                println!("  ✅ Process {} completed in {}ms", instance_path, duration_ms);
            }
            ExecutionEvent::ProcessFailed {
                instance_path,
                error,
                ..
            } => {
                println!("  ❌ Process {} failed: {}", instance_path, error);
            }
            ExecutionEvent::ProcessEvent {
                process_id, event, ..
            } => match event {
                ProcessEvent::Info { message } => {
                    println!("     ℹ️  [{}] {}", process_id, message);
                }
                ProcessEvent::Warning { message } => {
                    println!("     ⚠️  [{}] {}", process_id, message);
                }
                ProcessEvent::Progress {
                    value,
                    max,
                    message,
                } => {
                    let pct = percent(value, max);
                    match message {
                        Some(msg) => println!("     📊 [{}] {:.0}% - {}", process_id, pct, msg),
                        None => println!("     📊 [{}] {:.0}%", process_id, pct),
                    }
                }
            },
            ExecutionEvent::ExperimentCompleted {
                success,
                error,
                duration_ms,
                ..
            } => {
                if success {
                    println!("✨ Experiment completed successfully in {}ms", duration_ms);
                } else {
                    println!(
                        "💥 Experiment failed after {}ms: {}",
                        duration_ms,
                        error.unwrap_or_default()
                    );
                }
            }
        }
    }
}

/// Resources on the root protocol's output ports
pub fn print_outputs(protocol: &Process) {
    let filled: Vec<_> = protocol
        .outputs()
        .ports()
        .filter_map(|port| port.resource().map(|r| (port.name(), r)))
        .collect();
    if filled.is_empty() {
        return;
    }

    println!();
    println!("📤 Outputs:");
    for (name, resource) in filled {
        println!(
            "   {} ({}): {}",
            name,
            resource.resource_type,
            resource.value.to_json()
        );
    }
}

pub fn print_record_line(record: &ExperimentRecord) {
    println!(
        "  • {} {:<10} {:>5.1}%  {}",
        record.id,
        state_label(record.state),
        percent(record.progress.value, record.progress.max_value),
        record.title
    );
}

pub fn print_record(record: &ExperimentRecord) {
    println!("🧪 {}", record.title);
    println!("   ID: {}", record.id);
    println!("   State: {}", state_label(record.state));
    println!("   Validated: {}", record.is_validated);
    println!("   Archived: {}", record.is_archived);
    if let Some(pid) = record.pid {
        println!("   Worker pid: {}", pid);
    }
    if let Some(started_at) = record.started_at {
        println!("   Started: {}", started_at);
    }
    if let Some(ended_at) = record.ended_at {
        println!("   Ended: {}", ended_at);
    }
    println!(
        "   Progress: {:.1}%",
        percent(record.progress.value, record.progress.max_value)
    );
    if let Some(error) = &record.error {
        println!("   Error: {}", error);
    }
    if !record.progress.messages.is_empty() {
        println!("   Messages:");
        for message in &record.progress.messages {
            println!("     [{}] {}", message.timestamp.format("%H:%M:%S"), message.text);
        }
    }
}

//! Run reporting and console output.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::bootstrap::BootstrapError;
use crate::fleet::InstanceHandle;
use crate::orchestrator::RunReport;
use crate::partition::PlanSummary;
use crate::provision::{ProvisionReport, UnreadyInstance};

/// A reporter receives events as a run progresses.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called before the first create request.
    async fn on_creation_started(&self, count: usize);

    /// Called after the provider accepted slave `index`.
    async fn on_instance_created(&self, index: usize, id: &str);

    async fn on_instance_ready(&self, instance: &InstanceHandle);

    async fn on_instance_unready(&self, instance: &UnreadyInstance);

    /// Called once readiness polling has finished for every slave.
    async fn on_fleet_ready(&self, report: &ProvisionReport);

    /// Called after the jobs have been partitioned over the ready slaves.
    async fn on_plan(&self, plan: &PlanSummary);

    async fn on_bootstrap_complete(
        &self,
        instance: &InstanceHandle,
        result: &Result<(), BootstrapError>,
    );

    /// Called at the end of a run that was not aborted.
    async fn on_run_complete(&self, report: &RunReport);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_creation_started(&self, _count: usize) {}
    async fn on_instance_created(&self, _index: usize, _id: &str) {}
    async fn on_instance_ready(&self, _instance: &InstanceHandle) {}
    async fn on_instance_unready(&self, _instance: &UnreadyInstance) {}
    async fn on_fleet_ready(&self, _report: &ProvisionReport) {}
    async fn on_plan(&self, _plan: &PlanSummary) {}
    async fn on_bootstrap_complete(
        &self,
        _instance: &InstanceHandle,
        _result: &Result<(), BootstrapError>,
    ) {
    }
    async fn on_run_complete(&self, _report: &RunReport) {}
}

/// Console reporter with a progress bar over bootstraps.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }

    fn println(&self, line: String) {
        match self.progress.lock().ok().as_deref() {
            Some(Some(pb)) => pb.println(line),
            _ => println!("{}", line),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_creation_started(&self, count: usize) {
        println!("Creating {} slaves", count);
    }

    async fn on_instance_created(&self, index: usize, id: &str) {
        if self.verbose {
            println!("  created slave {} as instance {}", index + 1, id);
        }
    }

    async fn on_instance_ready(&self, instance: &InstanceHandle) {
        if self.verbose {
            println!("{} {}", console::style("READY").green(), instance);
        }
    }

    async fn on_instance_unready(&self, instance: &UnreadyInstance) {
        println!(
            "{} {}: {}",
            console::style("DOWN ").red(),
            instance.id,
            console::style(&instance.error).dim()
        );
    }

    async fn on_fleet_ready(&self, report: &ProvisionReport) {
        println!("{} of {} slaves ready", report.ready.len(), report.created());
    }

    async fn on_plan(&self, plan: &PlanSummary) {
        println!(
            "Assigning {} simulations to each of {} slaves",
            plan.shard_size, plan.shards
        );
        if plan.dropped > 0 {
            println!(
                "{}",
                console::style(format!(
                    "{} simulations do not divide evenly and will not run",
                    plan.dropped
                ))
                .yellow()
            );
        }

        let pb = indicatif::ProgressBar::new(plan.shards as u64);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        if let Ok(mut progress) = self.progress.lock() {
            *progress = Some(pb);
        }
    }

    async fn on_bootstrap_complete(
        &self,
        instance: &InstanceHandle,
        result: &Result<(), BootstrapError>,
    ) {
        let line = match result {
            Ok(()) if self.verbose => {
                Some(format!("{} {}", console::style("UP   ").green(), instance))
            }
            Ok(()) => None,
            Err(e) => Some(format!("{} {}: {}", console::style("FAIL ").red(), instance, e)),
        };
        if let Some(line) = line {
            self.println(line);
        }
        if let Ok(progress) = self.progress.lock()
            && let Some(pb) = progress.as_ref()
        {
            pb.inc(1);
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }

        print_summary(report);
    }
}

/// Prints the final summary of a run, listing every failed slave.
pub fn print_summary(report: &RunReport) {
    println!();
    println!("Run Results:");
    println!(
        "  Started:  {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Ready:    {}", console::style(report.ready.len()).green());
    println!(
        "  Launched: {}",
        console::style(report.bootstrapped.len()).green()
    );

    if !report.unready.is_empty() {
        println!("  Unready:  {}", console::style(report.unready.len()).red());
    }
    if !report.failed.is_empty() {
        println!("  Failed:   {}", console::style(report.failed.len()).red());
    }
    if report.dropped_jobs > 0 {
        println!(
            "  Dropped:  {} simulations",
            console::style(report.dropped_jobs).yellow()
        );
    }

    println!("  Duration: {:?}", report.duration);

    if report.success() {
        println!();
        println!("{}", console::style("All slaves launched!").green().bold());
    } else {
        println!();
        println!("{}", console::style("Some slaves failed.").red().bold());

        println!();
        println!("Failed slaves:");
        for unready in &report.unready {
            println!("  - {} (not ready)", unready.id);
            println!("    {}", console::style(&unready.error).dim());
        }
        for failed in &report.failed {
            println!("  - {} ({})", failed.instance, failed.error.step());
            println!("    {}", console::style(&failed.error).dim());
        }
    }

    if report.torn_down {
        println!();
        println!("Coordinator instance deleted.");
    }
}

use chrono::{Datelike, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use treino_core::buffer::ExecutionBuffer;
use treino_core::controller::{RecoveryPrompt, TickOutcome};
use treino_core::reallocation::WeekReview;
use treino_core::sink::read_commits;
use treino_core::validator::EditReason;
use treino_core::*;

#[derive(Parser)]
#[command(name = "treino")]
#[command(about = "Weekly workout planner and offline-safe session tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep everything local; sessions stay queued until the next sync
    #[arg(long, global = true)]
    offline: bool,

    /// Treat this date (YYYY-MM-DD) as today
    #[arg(long, global = true)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or edit this week's plan
    Plan {
        #[command(subcommand)]
        action: PlanCommand,
    },

    /// Run a workout session
    Workout {
        /// Day the workout counts for (0 = Sunday .. 6 = Saturday), default today
        #[arg(long)]
        day: Option<u8>,

        /// Workout type, default the mandatory workout planned for the day
        #[arg(long)]
        workout: Option<String>,

        /// Auto-complete (for testing) - confirm every set without prompting
        #[arg(long)]
        auto_complete: bool,

        /// Weight used for auto-completed sets
        #[arg(long, default_value_t = 20.0)]
        weight: f64,

        /// Reps used for auto-completed sets, default the exercise target
        #[arg(long)]
        reps: Option<u32>,

        /// Merge records left by an unfinished session
        #[arg(long, conflicts_with = "discard")]
        recover: bool,

        /// Throw away records left by an unfinished session
        #[arg(long)]
        discard: bool,

        /// Skip rest countdowns
        #[arg(long)]
        no_rest: bool,

        /// Stop after this many sets without finishing (simulates a crash)
        #[arg(long)]
        interrupt_after: Option<usize>,

        /// Readiness before the workout (0-5)
        #[arg(long)]
        pre: Option<u8>,

        /// Readiness after the workout (0-5)
        #[arg(long)]
        post: Option<u8>,
    },

    /// Send queued sessions to the remote store
    Sync {
        /// Give parked sessions a fresh retry budget first
        #[arg(long)]
        requeue_parked: bool,
    },

    /// Show queue and buffer state
    Status,

    /// Export committed sets to CSV
    Export,
}

#[derive(Subcommand)]
enum PlanCommand {
    /// Print the week with each day's edit status
    Show,

    /// Assign a day (guarded by the edit rules)
    Set {
        /// Day index (0 = Sunday .. 6 = Saturday)
        day: u8,

        /// rest, cardio or mandatory
        category: SlotCategory,

        /// Workout type for mandatory days
        workout_type: Option<String>,
    },

    /// List missed workouts and where they could move
    Review {
        /// Apply every suggested move
        #[arg(long)]
        apply: bool,
    },
}

/// Everything a command needs, wired from the data directory
struct App {
    config: Config,
    data_dir: PathBuf,
    store: Arc<dyn KeyValueStore>,
    plans: Arc<dyn PlanStore>,
    sink: Arc<dyn RemoteExecutionSink>,
    log_path: PathBuf,
    today: NaiveDate,
    key: PlanKey,
}

impl App {
    fn new(config: Config, data_dir: PathBuf, offline: bool, today: NaiveDate) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir.join("state")));
        let plans: Arc<dyn PlanStore> = Arc::new(KvPlanStore::new(store.clone()));
        let log = JsonlCommitLog::new(data_dir.join("remote"));
        let log_path = log.log_path();
        let sink: Arc<dyn RemoteExecutionSink> = if offline {
            Arc::new(OfflineSink)
        } else {
            Arc::new(log)
        };
        let key = PlanKey::for_date(config.user.user_id.clone(), today);

        Self {
            config,
            data_dir,
            store,
            plans,
            sink,
            log_path,
            today,
            key,
        }
    }

    fn weekday(&self) -> chrono::Weekday {
        self.today.weekday()
    }

    fn queue(&self) -> SyncQueue {
        SyncQueue::new(self.store.clone(), self.config.sync.clone())
    }

    fn editor(&self) -> PlanEditor {
        PlanEditor::new(self.plans.clone(), self.key.clone())
    }

    /// Startup trigger of the sync queue; failures only get logged
    fn flush_on_start(&self) {
        match self
            .queue()
            .flush_all(self.sink.as_ref(), Some(self.plans.as_ref()), Utc::now())
        {
            Ok(report) if !report.committed.is_empty() => {
                println!("✓ Synced {} queued session(s)", report.committed.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Startup sync failed: {}", e),
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    treino_core::logging::init_with_level("warn");

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| config.data.data_dir.clone());
    let today = cli.date.unwrap_or_else(|| chrono::Local::now().date_naive());

    let catalog = get_default_catalog();
    let errors = catalog.validate();
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::CatalogValidation("Invalid catalog".into()));
    }

    let app = App::new(config, data_dir, cli.offline, today);
    if !cli.offline && !matches!(cli.command, Commands::Sync { .. }) {
        app.flush_on_start();
    }

    match cli.command {
        Commands::Plan { action } => match action {
            PlanCommand::Show => cmd_plan_show(&app),
            PlanCommand::Set {
                day,
                category,
                workout_type,
            } => cmd_plan_set(&app, day, category, workout_type),
            PlanCommand::Review { apply } => cmd_plan_review(&app, apply),
        },
        Commands::Workout {
            day,
            workout,
            auto_complete,
            weight,
            reps,
            recover,
            discard,
            no_rest,
            interrupt_after,
            pre,
            post,
        } => {
            let recovery = if recover {
                Some(RecoveryChoice::Recover)
            } else if discard {
                Some(RecoveryChoice::Discard)
            } else {
                None
            };
            cmd_workout(
                &app,
                WorkoutArgs {
                    day,
                    workout,
                    auto_complete,
                    weight,
                    reps,
                    recovery,
                    no_rest,
                    interrupt_after,
                    pre,
                    post,
                },
            )
        }
        Commands::Sync { requeue_parked } => cmd_sync(&app, cli.offline, requeue_parked),
        Commands::Status => cmd_status(&app),
        Commands::Export => cmd_export(&app),
    }
}

// ============================================================================
// plan
// ============================================================================

fn cmd_plan_show(app: &App) -> Result<()> {
    let plan = app.editor().load()?;
    println!(
        "Week {} (today: {})",
        app.key,
        day_name(day_index(app.weekday()))
    );

    for day in 0..DAYS_PER_WEEK as u8 {
        let assignment = match plan.slot(day) {
            Some(slot) if slot.category == SlotCategory::Mandatory => {
                format!("{} ({})", slot.workout_type_id, slot.category)
            }
            Some(slot) => slot.category.to_string(),
            None => "-".to_string(),
        };
        let done = if plan.slot(day).map_or(false, |s| s.completed) {
            " ✓"
        } else {
            ""
        };

        let verdict = can_edit_day(day, &plan, app.weekday());
        let status = match verdict.reason {
            EditReason::None => "editable".to_string(),
            EditReason::CompletedWarning => "completed".to_string(),
            EditReason::PastDay => "locked".to_string(),
            EditReason::PendingWorkout => format!(
                "blocked by {}",
                day_name(verdict.blocking_day.unwrap_or_default())
            ),
            EditReason::InvalidDay => "invalid".to_string(),
        };

        println!(
            "  {} {:<10} {:<24} {}",
            day,
            day_name(day),
            format!("{}{}", assignment, done),
            status
        );
    }
    Ok(())
}

fn cmd_plan_set(
    app: &App,
    day: u8,
    category: SlotCategory,
    workout_type: Option<String>,
) -> Result<()> {
    if category == SlotCategory::Mandatory {
        let Some(workout_type) = workout_type.as_deref() else {
            return Err(Error::Other("Mandatory days need a workout type".into()));
        };
        if get_default_catalog().template(workout_type).is_none() {
            return Err(Error::Other(format!(
                "Unknown workout type '{}' (known: {})",
                workout_type,
                get_default_catalog().workout_type_ids().join(", ")
            )));
        }
    }

    let slot = DaySlot::with_category(category, workout_type.as_deref());
    match app.editor().quick_edit(day, slot, app.weekday())? {
        EditOutcome::Applied { warning } => {
            if let Some(warning) = warning {
                println!("⚠ {}", warning);
            }
            println!("✓ {} set to {}", day_name(day), describe(category, workout_type.as_deref()));
            Ok(())
        }
        EditOutcome::Blocked(verdict) => {
            let message = verdict
                .message
                .unwrap_or_else(|| "This day cannot be edited.".into());
            eprintln!("✗ Cannot edit {}: {}", day_name(day), message);
            Err(Error::InvalidState(message))
        }
    }
}

fn describe(category: SlotCategory, workout_type: Option<&str>) -> String {
    match (category, workout_type) {
        (SlotCategory::Mandatory, Some(t)) => format!("{} ({})", t, category),
        _ => category.to_string(),
    }
}

fn cmd_plan_review(app: &App, apply: bool) -> Result<()> {
    let plan = app.editor().load()?;
    let review: WeekReview = validate_week(&plan, app.weekday());

    if !review.needs_attention() {
        println!("✓ No missed workouts this week");
        return Ok(());
    }

    for issue in &review.issues {
        println!("⚠ {}", issue.message);
    }
    if review.suggestions.is_empty() {
        println!("  No open day left this week.");
        return Ok(());
    }
    for suggestion in &review.suggestions {
        println!("  → {}", suggestion.describe());
    }

    if apply {
        for suggestion in &review.suggestions {
            match apply_suggestion(app.plans.as_ref(), &app.key, suggestion, app.weekday()) {
                Ok(_) => println!("✓ {}", suggestion.describe()),
                Err(Error::Conflict(msg)) => {
                    eprintln!("✗ Plan changed, skipped: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

// ============================================================================
// workout
// ============================================================================

struct WorkoutArgs {
    day: Option<u8>,
    workout: Option<String>,
    auto_complete: bool,
    weight: f64,
    reps: Option<u32>,
    recovery: Option<RecoveryChoice>,
    no_rest: bool,
    interrupt_after: Option<usize>,
    pre: Option<u8>,
    post: Option<u8>,
}

fn cmd_workout(app: &App, args: WorkoutArgs) -> Result<()> {
    let day = args.day.unwrap_or_else(|| day_index(app.weekday()));
    check_day(day)?;

    let workout_type = match args.workout {
        Some(t) => t,
        None => {
            let plan = app.editor().load()?;
            match plan.slot(day) {
                Some(slot) if slot.category == SlotCategory::Mandatory => {
                    slot.workout_type_id.clone()
                }
                _ => {
                    return Err(Error::Other(format!(
                        "No mandatory workout planned for {}; pass --workout",
                        day_name(day)
                    )))
                }
            }
        }
    };
    let template = get_default_catalog()
        .template(&workout_type)
        .cloned()
        .ok_or_else(|| Error::Other(format!("Unknown workout type '{}'", workout_type)))?;

    let mut controller = WorkoutSessionController::new(
        app.key.clone(),
        ExecutionBuffer::new(app.store.clone()),
        app.queue(),
        app.plans.clone(),
        app.sink.clone(),
        app.config.session.clone(),
    );

    let plan = SessionPlan {
        day_index: day,
        workout: template,
    };
    let mut outcome = controller.start(plan.clone(), args.recovery)?;
    if let StartOutcome::RecoveryRequired(prompt) = &outcome {
        print_recovery_prompt(prompt);
        if args.auto_complete {
            return Err(Error::InvalidState(
                "unfinished session found; rerun with --recover or --discard".into(),
            ));
        }
        let choice = prompt_recovery()?;
        outcome = controller.start(plan, Some(choice))?;
    }

    if let StartOutcome::Started {
        recovered,
        offline_protection,
        ..
    } = outcome
    {
        println!("\n{} on {}", workout_type, day_name(day));
        if recovered > 0 {
            println!("  Recovered {} set(s) from the unfinished session", recovered);
        }
        if !offline_protection {
            println!("⚠ Offline protection unavailable: sets are kept in memory only");
        }
    }
    controller.set_ratings(args.pre, None)?;

    let mut sets = 0usize;
    loop {
        match controller.state() {
            SessionState::Active {
                completed_series, ..
            } => {
                if args.interrupt_after == Some(sets) {
                    println!("Session interrupted after {} set(s)", sets);
                    return Ok(());
                }
                let Some(exercise) = controller.current_exercise().cloned() else {
                    return Err(Error::InvalidState("no current exercise".into()));
                };
                let input = if args.auto_complete {
                    SetInput::Set(args.weight, args.reps.unwrap_or(exercise.target_reps))
                } else {
                    prompt_set(&exercise, completed_series + 1)?
                };

                let (weight, reps) = match input {
                    SetInput::Set(weight, reps) => (weight, reps),
                    SetInput::Quit => {
                        if confirm("Abandon this workout? Confirmed sets will be discarded")? {
                            let ticket = controller.request_abandon()?;
                            let discarded = controller.confirm_abandon(ticket)?;
                            println!("Workout abandoned ({} set(s) discarded)", discarded);
                            return Ok(());
                        }
                        continue;
                    }
                };

                match controller.confirm_set(weight, reps)? {
                    SetOutcome::Rejected(e) => println!("✗ {}", e),
                    SetOutcome::Recorded { persisted, .. }
                    | SetOutcome::RestStarted { persisted, .. }
                    | SetOutcome::WorkoutCompleted { persisted } => {
                        sets += 1;
                        let mark = if persisted { "✓" } else { "⚠" };
                        println!(
                            "  {} {} set {}/{}: {} x {}",
                            mark,
                            exercise.name,
                            completed_series + 1,
                            exercise.series,
                            weight,
                            reps
                        );
                    }
                }
            }
            SessionState::Resting {
                remaining_seconds, ..
            } => {
                if args.no_rest {
                    controller.skip_rest()?;
                    continue;
                }
                print!("\r  Rest {:>3}s ", remaining_seconds);
                io::stdout().flush()?;
                std::thread::sleep(Duration::from_secs(1));
                if let TickOutcome::RestOver { .. } = controller.tick() {
                    println!();
                }
            }
            SessionState::Completed => break,
            SessionState::Idle | SessionState::Flushing => {
                return Err(Error::InvalidState("session ended unexpectedly".into()))
            }
        }
    }

    if args.post.is_some() {
        controller.set_ratings(None, args.post)?;
    }
    let report = controller.finish()?;
    println!("\n✓ Workout finished: {} set(s)", report.records);

    let synced = report
        .flush
        .as_ref()
        .map_or(false, |f| f.committed.contains(&report.session_id));
    if synced || report.committed_directly {
        println!("✓ Synced");
    } else {
        let waiting = controller.queue().len()?;
        println!(
            "⚠ Saved offline; {} session(s) waiting to sync",
            waiting
        );
    }
    Ok(())
}

enum SetInput {
    Set(f64, u32),
    Quit,
}

fn prompt_set(exercise: &ExerciseTarget, set: u32) -> Result<SetInput> {
    loop {
        println!(
            "{} - set {}/{} (target {} reps)",
            exercise.name, set, exercise.series, exercise.target_reps
        );
        print!("weight reps (or 'q' to quit)> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Err(Error::InvalidState(
                "input closed; confirmed sets are kept for recovery".into(),
            ));
        }
        let input = input.trim();
        if input.eq_ignore_ascii_case("q") {
            return Ok(SetInput::Quit);
        }

        let mut parts = input.split_whitespace();
        let weight = parts.next().and_then(|w| w.replace(',', ".").parse::<f64>().ok());
        let reps = match parts.next() {
            Some(r) => r.parse::<u32>().ok(),
            None => Some(exercise.target_reps),
        };
        match (weight, reps) {
            (Some(weight), Some(reps)) => return Ok(SetInput::Set(weight, reps)),
            _ => println!("Enter a weight and optionally the reps, e.g. '40 10'"),
        }
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_recovery_prompt(prompt: &RecoveryPrompt) {
    println!(
        "Unfinished {} session from {} has {} unsent set(s).",
        prompt.workout_type_id,
        prompt.started_at.format("%Y-%m-%d %H:%M"),
        prompt.records
    );
}

fn prompt_recovery() -> Result<RecoveryChoice> {
    loop {
        print!("'r' to recover them, 'd' to discard> ");
        io::stdout().flush()?;
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Err(Error::InvalidState("no recovery choice given".into()));
        }
        match input.trim().to_lowercase().as_str() {
            "r" => return Ok(RecoveryChoice::Recover),
            "d" => return Ok(RecoveryChoice::Discard),
            _ => continue,
        }
    }
}

// ============================================================================
// sync / status / export
// ============================================================================

fn cmd_sync(app: &App, offline: bool, requeue_parked: bool) -> Result<()> {
    let queue = app.queue();
    if requeue_parked {
        let moved = queue.requeue_parked(Utc::now())?;
        println!("✓ Requeued {} parked session(s)", moved);
    }

    if offline {
        println!("Offline: {} session(s) waiting to sync", queue.len()?);
        return Ok(());
    }

    let report = queue.on_online(app.sink.as_ref(), Some(app.plans.as_ref()), Utc::now())?;
    println!("✓ Synced {} session(s)", report.committed.len());
    if report.failed > 0 {
        println!("⚠ {} session(s) failed and stay queued", report.failed);
    }
    if report.parked > 0 {
        println!(
            "⚠ {} session(s) parked after repeated failures (use --requeue-parked)",
            report.parked
        );
    }
    Ok(())
}

fn cmd_status(app: &App) -> Result<()> {
    let queue = app.queue();
    let pending = queue.pending()?;
    let parked = queue.parked()?;
    let leftover = ExecutionBuffer::new(app.store.clone()).leftover()?;
    let committed = read_commits(&app.log_path)?;

    println!("Data directory: {}", app.data_dir.display());
    println!("Pending sessions: {}", pending.len());
    for entry in &pending {
        println!(
            "  {} ({} sets, {} attempt(s){})",
            entry.session_id(),
            entry.session.records.len(),
            entry.attempts,
            entry
                .last_error
                .as_ref()
                .map(|e| format!(", last error: {}", e))
                .unwrap_or_default()
        );
    }
    println!("Parked sessions: {}", parked.len());
    match leftover {
        Some(snapshot) => println!(
            "Unfinished session: {} with {} set(s)",
            snapshot.workout_type_id,
            snapshot.records.len()
        ),
        None => println!("Unfinished session: none"),
    }
    println!("Committed sessions: {}", committed.len());
    Ok(())
}

fn cmd_export(app: &App) -> Result<()> {
    let csv_path = app.data_dir.join("executions.csv");
    if !app.log_path.exists() {
        println!("No committed sessions - nothing to export.");
        return Ok(());
    }

    let rows = export_records_csv(&app.log_path, &csv_path)?;
    println!("✓ Exported {} set(s) to CSV", rows);
    println!("  CSV: {}", csv_path.display());
    Ok(())
}

//! stagepay-runner: headless driver for the staged subscription backend.
//!
//! Usage:
//!   stagepay-runner --user alice --db stagepay.db
//!   stagepay-runner --user alice --data-dir ./data --ipc-mode

use anyhow::Result;
use stagepay_core::{
    clock::SystemClock,
    config::ServiceConfig,
    error::{StageError, StageResult},
    identity::StaticIdentity,
    service::{AccountService, ErrorResponse},
    store::{SqliteStore, WithdrawalStore},
    withdrawal::{WithdrawalRecord, WithdrawalStatus},
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    UploadReceipt {
        #[serde(default)]
        receipt: Option<String>,
    },
    CompleteStage,
    Status,
    Qualification,
    PendingWithdrawals,
    AddWithdrawal {
        amount: i64,
        #[serde(default = "pending")]
        status: WithdrawalStatus,
    },
    Quit,
}

fn pending() -> WithdrawalStatus {
    WithdrawalStatus::Pending
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let user = arg_value(&args, "--user").unwrap_or("demo-user");
    let data_dir = arg_value(&args, "--data-dir");

    let mut config = match data_dir {
        Some(dir) => ServiceConfig::load(dir)?,
        None => ServiceConfig::default_test(),
    };
    if let Some(db) = arg_value(&args, "--db") {
        config.store.db_path = db.to_string();
    }

    if !ipc_mode {
        println!("stagepay-runner");
        println!("  user:      {user}");
        println!("  db:        {}", config.store.db_path);
        println!("  data_dir:  {}", data_dir.unwrap_or("(built-in defaults)"));
        println!();
    }

    let store = Arc::new(SqliteStore::open(&config.store.db_path, config.store_timeout())?);
    store.migrate()?;

    let service = AccountService::build(&config, Arc::clone(&store), Arc::new(SystemClock));
    let caller = StaticIdentity::new(user);

    if ipc_mode {
        run_ipc_loop(&service, &store, &caller)?;
    } else {
        print_summary(&service, &store, &caller)?;
    }

    Ok(())
}

fn run_ipc_loop(service: &AccountService, store: &SqliteStore, caller: &StaticIdentity) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string(), "code": "bad_command" });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::UploadReceipt { receipt } => {
                to_reply(service.upload_receipt(caller, receipt.map(String::into_bytes)))
            }
            IpcCommand::CompleteStage => to_reply(service.complete_stage(caller)),
            IpcCommand::Status => to_reply(service.status(caller)),
            IpcCommand::Qualification => to_reply(service.qualification(caller)),
            IpcCommand::PendingWithdrawals => to_reply(service.pending_withdrawals(caller)),
            IpcCommand::AddWithdrawal { amount, status } => {
                to_reply(add_withdrawal(store, caller, amount, status))
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn add_withdrawal(
    store: &SqliteStore,
    caller: &StaticIdentity,
    amount: i64,
    status: WithdrawalStatus,
) -> StageResult<WithdrawalRecord> {
    use stagepay_core::identity::IdentityProvider;
    let record = WithdrawalRecord::new(caller.current_user_id()?, amount, status, chrono::Utc::now());
    store.insert_withdrawal(&record)?;
    log::info!("runner: recorded {status} withdrawal {} of {amount}", record.id);
    Ok(record)
}

fn to_reply<T: serde::Serialize>(result: StageResult<T>) -> serde_json::Value {
    match result {
        Ok(body) => serde_json::to_value(body)
            .unwrap_or_else(|e| error_value(&StageError::Serialization(e))),
        Err(e) => {
            if e.is_retryable() {
                log::warn!("runner: transient failure: {e}");
            }
            error_value(&e)
        }
    }
}

fn error_value(err: &StageError) -> serde_json::Value {
    serde_json::to_value(ErrorResponse::from(err))
        .unwrap_or_else(|_| serde_json::json!({ "error": err.to_string() }))
}

fn print_summary(service: &AccountService, store: &SqliteStore, caller: &StaticIdentity) -> Result<()> {
    let status = service.status(caller)?;
    let qualified = service.qualification(caller)?.qualified;
    let pending = service.pending_withdrawals(caller)?;
    let catalog = service.machine().catalog();

    println!("=== SUBSCRIPTION STATUS ===");
    println!("  stage:          {}", status.current_stage);
    println!("  amount due:     {}", catalog.amount_for(status.current_stage));
    println!("  processing:     {}", status.is_processing);
    println!("  completed:      {}", status.is_completed);
    println!("  qualified:      {qualified}");
    println!();
    println!("=== PENDING WITHDRAWALS ===");
    if pending.is_empty() {
        println!("  (none)");
    } else {
        for w in &pending {
            println!("  {} | {} | {}", w.id, w.amount, w.created_at.to_rfc3339());
        }
    }
    println!();
    println!("=== STORE ===");
    println!("  subscriptions:  {}", store.subscription_count()?);
    println!("  qualified:      {}", store.qualified_user_count()?);
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

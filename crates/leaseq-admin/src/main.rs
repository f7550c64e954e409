use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use leaseq_client::{LeasedTask, TaskQueueAsyncClient};
use leaseq_core::TaskId;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "leaseq")]
#[command(about = "Command line client for the leaseq broker", long_about = None)]
struct Args {
    /// Broker address
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    broker: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Plain)]
    format: Format,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Plain,
    Json,
    Table,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enqueue a task
    Add {
        queue: String,

        /// Length hint stored with the task
        #[arg(allow_hyphen_values = true)]
        length: i64,

        /// Payload; several words are joined with single spaces
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        data: Vec<String>,
    },

    /// Lease the next idle task of a queue
    Get { queue: String },

    /// Acknowledge a leased task
    Ack { queue: String, task_id: String },

    /// Check whether a queue holds a task
    In { queue: String, task_id: String },

    /// Ask the broker to write a checkpoint
    Save,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let client = TaskQueueAsyncClient::connect(&args.broker)
        .await?
        .with_timeout(Duration::from_secs(args.timeout));

    match args.command {
        Commands::Add {
            queue,
            length,
            data,
        } => {
            let task_id = client.add(queue.as_str(), length, data.join(" ")).await?;
            print_task_id(args.format, &queue, &task_id);
        }

        Commands::Get { queue } => {
            let task = client.get(queue.as_str()).await?;
            print_task(args.format, &queue, task.as_ref())?;
        }

        Commands::Ack { queue, task_id } => {
            let task_id = TaskId::from(task_id);
            let acked = client.ack(queue.as_str(), &task_id).await?;
            print_answer(args.format, "acked", &queue, &task_id, acked);
        }

        Commands::In { queue, task_id } => {
            let task_id = TaskId::from(task_id);
            let present = client.contains(queue.as_str(), &task_id).await?;
            print_answer(args.format, "present", &queue, &task_id, present);
        }

        Commands::Save => {
            client.save().await?;
            match args.format {
                Format::Json => println!("{}", serde_json::json!({ "saved": true })),
                Format::Plain | Format::Table => println!("OK"),
            }
        }
    }

    Ok(())
}

fn print_task_id(format: Format, queue: &str, task_id: &TaskId) {
    match format {
        Format::Plain => println!("{}", task_id),
        Format::Json => println!(
            "{}",
            serde_json::json!({ "queue": queue, "task_id": task_id })
        ),
        Format::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Queue", "Task ID"]);
            table.add_row(vec![queue, task_id.as_str()]);
            println!("{table}");
        }
    }
}

fn print_task(format: Format, queue: &str, task: Option<&LeasedTask>) -> anyhow::Result<()> {
    match (format, task) {
        (Format::Plain, Some(task)) => println!("{} {} {}", task.id, task.length, task.data),
        (Format::Plain, None) => println!("NONE"),
        (Format::Json, task) => println!("{}", serde_json::to_string_pretty(&task)?),
        (Format::Table, Some(task)) => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Field", "Value"]);
            table.add_row(vec!["Queue", queue]);
            table.add_row(vec!["ID", task.id.as_str()]);
            table.add_row(vec!["Length", &task.length.to_string()]);
            table.add_row(vec!["Data", &task.data]);
            println!("{table}");
        }
        (Format::Table, None) => println!("No idle task in queue {}", queue),
    }
    Ok(())
}

fn print_answer(format: Format, field: &str, queue: &str, task_id: &TaskId, answer: bool) {
    match format {
        Format::Plain => println!("{}", if answer { "YES" } else { "NO" }),
        Format::Json => println!(
            "{}",
            serde_json::json!({ "queue": queue, "task_id": task_id, field: answer })
        ),
        Format::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Queue", "Task ID", field]);
            table.add_row(vec![queue, task_id.as_str(), &answer.to_string()]);
            println!("{table}");
        }
    }
}

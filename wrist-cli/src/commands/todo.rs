//! Show and edit to-do lists.

use anyhow::{Context, Result};
use clap::Subcommand;
use hawrist_client::ClientConfig;
use hawrist_types::{EntityId, TodoItem, TodoItemStatus};

/// To-do list actions.
#[derive(Subcommand, Debug)]
pub enum TodoAction {
    /// Print the items of a list
    List {
        /// To-do list entity
        list: String,
        /// Keep printing the list whenever it changes
        #[arg(long, short)]
        follow: bool,
    },
    /// Add an item
    Add {
        /// To-do list entity
        list: String,
        /// Item text
        summary: String,
    },
    /// Mark an item completed
    Complete {
        /// To-do list entity
        list: String,
        /// Item text or uid
        item: String,
    },
    /// Remove an item
    Remove {
        /// To-do list entity
        list: String,
        /// Item text or uid
        item: String,
    },
}

fn parse_list(raw: &str) -> Result<EntityId> {
    let id = EntityId::parse(raw).with_context(|| format!("Invalid entity id {:?}", raw))?;
    if id.domain() != "todo" {
        anyhow::bail!("{} is not a to-do list", id);
    }
    Ok(id)
}

fn print_items(items: &[TodoItem]) {
    for item in items {
        let mark = if item.status == TodoItemStatus::Completed {
            "x"
        } else {
            " "
        };
        match &item.due {
            Some(due) => println!("[{}] {}  (due {})", mark, item.summary, due),
            None => println!("[{}] {}", mark, item.summary),
        }
    }
    let open = items.iter().filter(|item| item.is_open()).count();
    println!("{} open, {} total", open, items.len());
}

/// Run a to-do action.
pub async fn run(config: ClientConfig, action: TodoAction) -> Result<()> {
    let client = super::connect(config).await?;

    match action {
        TodoAction::List { list, follow } => {
            let list = parse_list(&list)?;
            let mut items = client.subscribe_todo_items(&list).await?;
            // The first event carries the current item set.
            let current = items
                .next()
                .await
                .context("Subscription ended before the item set arrived")??;
            print_items(&current);

            if follow {
                loop {
                    tokio::select! {
                        next = items.next() => match next {
                            Some(current) => {
                                println!();
                                print_items(&current?);
                            }
                            None => break,
                        },
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            }
            items.cancel().await;
        }
        TodoAction::Add { list, summary } => {
            client.todo_add_item(&parse_list(&list)?, &summary).await?;
            println!("Added {:?}", summary);
        }
        TodoAction::Complete { list, item } => {
            client
                .todo_update_item(
                    &parse_list(&list)?,
                    &item,
                    None,
                    Some(TodoItemStatus::Completed),
                )
                .await?;
            println!("Completed {:?}", item);
        }
        TodoAction::Remove { list, item } => {
            client.todo_remove_item(&parse_list(&list)?, &item).await?;
            println!("Removed {:?}", item);
        }
    }

    client.disconnect().await?;
    Ok(())
}

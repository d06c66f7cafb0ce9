use std::io::Read;
use std::{fs, io};

use anyhow::{Context, Result};
use serde::Serialize;
use spdlog::warn;

use blogstore::config::{load_config, split_keys};
use blogstore::config_data::write_sample_cfg;
use blogstore::front_matter::render_post;
use blogstore::logger::configure_logger;
use blogstore::post::{Language, NewPost};
use blogstore::repository::ListFilter;
use blogstore::store::ContentStore;
use blogstore::util::os_helper::get_name;

use crate::{Cli, Command, CreateArgs};

fn parse_language(language: Option<&str>) -> Result<Option<Language>> {
    Ok(language.map(|l| l.parse::<Language>()).transpose()?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_body(args: &CreateArgs) -> Result<String> {
    match args.body_file {
        Some(ref path) => fs::read_to_string(path).with_context(|| format!("Error reading {}", path.display())),
        None => {
            let mut body = String::new();
            io::stdin().read_to_string(&mut body).context("Error reading body from stdin")?;
            Ok(body)
        }
    }
}

pub(crate) async fn run_cmd(cli: Cli) -> Result<()> {
    if let Command::SampleConfig(ref args) = cli.command {
        let name = args.name.clone().unwrap_or_else(get_name);
        write_sample_cfg(&args.out_file, &name)
            .with_context(|| format!("Error writing {}", args.out_file.display()))?;
        println!("Creating file {}", args.out_file.display());
        return Ok(());
    }

    let config = load_config(cli.config_path.map(Into::into))?;
    if let Err(err) = configure_logger(&config, "tool") {
        warn!("Error creating logger sinks. Using console instead. Desc={}", err);
    }
    let store = ContentStore::open(&config).await?;

    match cli.command {
        Command::Create(args) => {
            let body = read_body(&args)?;
            let language = parse_language(Some(&args.language))?.unwrap_or_default();
            let new_post = NewPost {
                tags: args.tags.as_deref().map(split_keys).unwrap_or_default(),
                categories: args.categories.as_deref().map(split_keys),
                draft: args.draft,
                filename: args.filename,
                ..NewPost::new(&args.title, &body, language)
            };
            let receipt = store.create(new_post).await?;
            if cli.json {
                print_json(&receipt)?;
            } else {
                println!("Created {} ({})", receipt.path.display(), receipt.commit.as_deref().unwrap_or("no commit"));
            }
        }
        Command::List(args) => {
            let filter = ListFilter {
                language: parse_language(args.language.as_deref())?,
                tag: args.tag,
                include_drafts: !args.no_drafts,
                limit: args.limit,
                offset: args.offset,
            };
            let page = store.list(&filter)?;
            if cli.json {
                print_json(&page)?;
            } else {
                for post in page.posts.iter() {
                    let draft = if post.draft { " [draft]" } else { "" };
                    println!("{}  {}/{}  {}{}", post.date.format("%Y-%m-%d"), post.language, post.filename, post.title, draft);
                }
                println!("{} of {} posts{}", page.posts.len(), page.total, if page.has_more { ", more available" } else { "" });
            }
        }
        Command::Get(args) => {
            let post = store.get(&args.filename, parse_language(args.language.as_deref())?)?;
            if cli.json {
                print_json(&post)?;
            } else {
                print!("{}", render_post(&post)?);
            }
        }
        Command::Search(args) => {
            let hits = store.search(&args.query, parse_language(args.language.as_deref())?)?;
            if cli.json {
                print_json(&hits)?;
            } else {
                for hit in hits.iter() {
                    println!("{:>4}  {}/{}  {}", hit.matches, hit.post.language, hit.post.filename, hit.post.title);
                }
            }
        }
        Command::Delete(args) => {
            let receipt = store.delete(&args.filename, parse_language(args.language.as_deref())?).await?;
            if cli.json {
                print_json(&receipt)?;
            } else {
                println!("Deleted {}", receipt.path.display());
            }
        }
        Command::Sync => {
            let outcome = store.sync().await?;
            if cli.json {
                print_json(&outcome)?;
            } else if outcome.advanced {
                println!("Updated to {}", outcome.head.as_deref().unwrap_or("-"));
            } else {
                println!("Already up to date");
            }
        }
        Command::Status => {
            let status = store.status().await?;
            if cli.json {
                print_json(&status)?;
            } else {
                println!("On {} (ahead {}, behind {})", status.branch.as_deref().unwrap_or("-"), status.ahead, status.behind);
                for change in status.changes.iter() {
                    println!("{}", change);
                }
            }
        }
        Command::Log(args) => {
            let commits = store.recent_commits(args.limit).await?;
            if cli.json {
                print_json(&commits)?;
            } else {
                for commit in commits.iter() {
                    println!("{} {} {} ({})", commit.short_id, commit.date.format("%Y-%m-%d %H:%M"), commit.subject, commit.author);
                }
            }
        }
        Command::Translations(args) => {
            let source = parse_language(Some(&args.source))?.unwrap_or(Language::Ko);
            let target = parse_language(Some(&args.target))?.unwrap_or(Language::En);
            let status = store.translation_status(source, target)?;
            if cli.json {
                print_json(&status)?;
            } else {
                println!("{}: {} posts, {}: {} posts", source, status.source_count, target, status.target_count);
                for stem in status.needs_translation.iter() {
                    println!("needs translation: {}", stem);
                }
                for stem in status.target_only.iter() {
                    println!("only in {}: {}", target, stem);
                }
            }
        }
        Command::SampleConfig(_) => {}
    }

    Ok(())
}

use anyhow::{anyhow, Result};
use clap::{crate_version, App, AppSettings, Arg, ArgMatches, SubCommand};
use ogham::build::build_from_config;
use ogham::comments::CommentsWidget;
use ogham::config::Config;
use ogham::generate::Generator;
use ogham::list::{LoadOutcome, PostListView};
use ogham::prismic::{Client, HttpTransport};
use ogham::serve::{serve, AppState};
use ogham::write::{Renderer, Site, Templates};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = App::new("ogham")
        .version(crate_version!())
        .about("Renders a blog from a Prismic repository")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("project")
                .long("project")
                .short("p")
                .takes_value(true)
                .global(true)
                .help("Directory to search (upwards) for ogham.yaml"),
        )
        .subcommand(
            SubCommand::with_name("build")
                .about("Writes the static site to disk")
                .arg(
                    Arg::with_name("output")
                        .long("output")
                        .short("o")
                        .takes_value(true)
                        .default_value("./_output")
                        .help("Output directory"),
                ),
        )
        .subcommand(
            SubCommand::with_name("serve")
                .about("Serves the site, rendering new posts on demand")
                .arg(
                    Arg::with_name("listen")
                        .long("listen")
                        .takes_value(true)
                        .default_value("127.0.0.1:3000")
                        .help("Address to listen on"),
                ),
        )
        .subcommand(
            SubCommand::with_name("list")
                .about("Prints the post list, loading more pages as needed")
                .arg(
                    Arg::with_name("pages")
                        .long("pages")
                        .takes_value(true)
                        .default_value("1")
                        .help("How many pages to show"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("build", Some(sub)) => {
            let config = load_config(sub, PathBuf::from(value(sub, "output")?))?;
            let generator = generator(&config)?;
            let summary = build_from_config(&config, &generator, &renderer(&config)?).await?;
            println!(
                "Built {} post pages into {}",
                summary.post_pages,
                config.output_directory.display()
            );
            Ok(())
        }
        ("serve", Some(sub)) => {
            let config = load_config(sub, PathBuf::new())?;
            let state = AppState::prerender(
                generator(&config)?,
                Arc::new(renderer(&config)?),
                config.static_source_directory.clone(),
            )
            .await?;
            serve(state, value(sub, "listen")?).await
        }
        ("list", Some(sub)) => {
            let config = load_config(sub, PathBuf::new())?;
            let pages: usize = value(sub, "pages")?.parse()?;
            list(&config, pages).await
        }
        _ => Err(anyhow!("Unknown subcommand")),
    }
}

fn value<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| anyhow!("Missing argument `{}`", name))
}

fn load_config(matches: &ArgMatches, output_directory: PathBuf) -> Result<Config> {
    let project_dir = match matches.value_of("project") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    Ok(Config::from_directory(&project_dir, &output_directory)?
        .with_env(|name| std::env::var(name).ok()))
}

fn client(config: &Config) -> Result<Client<HttpTransport>> {
    Ok(Client::new(
        HttpTransport::new(config.request_timeout)?,
        config.api_endpoint.clone(),
        config.access_token.clone(),
    ))
}

fn generator(config: &Config) -> Result<Generator<HttpTransport>> {
    Ok(Generator::new(
        Arc::new(client(config)?),
        config.page_size,
        config.revalidate,
    ))
}

fn renderer(config: &Config) -> Result<Renderer> {
    let templates = Templates::load(
        &config.list_template,
        &config.post_template,
        &config.fallback_template,
    )?;
    Ok(Renderer::new(
        templates,
        Site {
            site_root: config.site_root.clone(),
            static_url: config.static_url(),
            date_format: config.date_format.clone(),
            comments: CommentsWidget::new(config.comments_repo.clone()),
        },
    ))
}

async fn list(config: &Config, pages: usize) -> Result<()> {
    let client = client(config)?;
    let view = PostListView::new(
        client.list_posts(1, config.page_size, None).await?,
        config.request_timeout,
    );

    for _ in 1..pages {
        match view.load_more(&client).await {
            LoadOutcome::Loaded(_) | LoadOutcome::Busy => {}
            LoadOutcome::Exhausted => break,
            LoadOutcome::Failed(err) => {
                eprintln!("Couldn't load more posts: {}", err);
                break;
            }
        }
    }

    let snapshot = view.snapshot();
    for post in &snapshot.rows {
        println!(
            "{}  {}  ({})",
            config
                .date_format
                .format(post.first_publication_date.as_deref()),
            post.title,
            post.author
        );
        println!("    {}", post.subtitle);
    }
    if snapshot.show_load_more {
        println!("... more posts available (use --pages)");
    }
    Ok(())
}

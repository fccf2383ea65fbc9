mod arg_parser;
mod client_cli;

use arg_parser::{ArgParser, SubCommand};
use client_cli::{ClientCli, StartOptions};

use clap::Parser;
use std::{error, process};

#[tokio::main]
async fn main() {
    let args = ArgParser::parse();
    if let Err(err) = run(args).await {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

async fn run(args: ArgParser) -> Result<(), Box<dyn error::Error>> {
    let client = ClientCli::connect(&args.server);

    let response = match args.sub_command {
        SubCommand::Health => client.health().await?,
        SubCommand::Datasets => client.datasets().await?,
        SubCommand::Dataset { dataset_id } => client.dataset(&dataset_id).await?,
        SubCommand::Upload {
            description,
            images,
        } => client.upload(&description, &images).await?,
        SubCommand::Delete { dataset_id } => client.delete(&dataset_id).await?,
        SubCommand::Prompt { dataset_id, set } => match set {
            Some(text_prompt) => client.set_text_prompt(&dataset_id, &text_prompt).await?,
            None => client.text_prompt(&dataset_id).await?,
        },
        SubCommand::Images { dataset_id } => client.images(&dataset_id).await?,
        SubCommand::Start {
            dataset_id,
            livekit_url,
            api_key,
            api_secret,
            room_name,
        } => {
            let options = StartOptions {
                livekit_url,
                api_key,
                api_secret,
                room_name,
            };
            client.start(&dataset_id, &options).await?
        }
        SubCommand::Stop { dataset_id } => client.stop(&dataset_id).await?,
        SubCommand::Status { dataset_id } => client.status(&dataset_id).await?,
        SubCommand::List => client.list().await?,
        SubCommand::Log { dataset_id } => {
            print!("{}", client.log(&dataset_id).await?);
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

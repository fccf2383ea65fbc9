use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Talk to a dataset and inference supervision server
#[derive(Debug, Parser)]
pub struct ArgParser {
    /// Base URL of the server
    #[clap(
        short = 's',
        long = "server",
        env = "SUPERVISOR_URL",
        default_value = "http://localhost:5000"
    )]
    pub server: String,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum SubCommand {
    /// check that the server is up
    Health,
    /// list every dataset
    Datasets,
    /// show one dataset's metadata
    Dataset { dataset_id: String },
    /// upload reference images as a new dataset and preprocess it
    Upload {
        #[clap(long)]
        /// what the images show, used as the detection prompt
        description: String,

        #[clap(required = true, parse(from_os_str))]
        /// image files, numbered in the order given
        images: Vec<PathBuf>,
    },
    /// delete a dataset
    Delete { dataset_id: String },
    /// show or replace a dataset's text prompt
    Prompt {
        dataset_id: String,

        #[clap(long)]
        /// new text prompt
        set: Option<String>,
    },
    /// list a dataset's reference and verification images
    Images { dataset_id: String },
    /// start inference for a preprocessed dataset
    Start {
        dataset_id: String,

        #[clap(long)]
        livekit_url: Option<String>,

        #[clap(long)]
        api_key: Option<String>,

        #[clap(long)]
        api_secret: Option<String>,

        #[clap(long)]
        room_name: Option<String>,
    },
    /// stop inference for a dataset
    Stop { dataset_id: String },
    /// get inference status for a dataset
    Status { dataset_id: String },
    /// list running inference workers
    List,
    /// print an inference worker's log
    Log { dataset_id: String },
}

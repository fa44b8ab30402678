use anyhow::Result;
use clap::Args;
use sagemaker_client::{disable_autoscaling, enable_autoscaling, AwsClients};

#[derive(Args, Debug)]
pub struct AutoscaleArgs {
    /// Endpoint to configure
    #[arg(value_name = "ENDPOINT_NAME")]
    pub endpoint_name: String,
    /// Disable autoscaling
    #[arg(long)]
    pub disable: bool,
}

pub async fn run(args: AutoscaleArgs) -> Result<()> {
    let aws = AwsClients::connect().await?;

    if args.disable {
        println!("Disabling autoscaling for {}", args.endpoint_name);
        disable_autoscaling(&aws.scaling, &args.endpoint_name).await?;
    } else {
        println!("Enabling autoscaling for {}", args.endpoint_name);
        enable_autoscaling(&aws.scaling, &args.endpoint_name).await?;
    }

    println!("Done");
    Ok(())
}

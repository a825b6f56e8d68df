use pubsock_endpoint::Endpoint;

use crate::cmd::OffsetArgs;
use crate::exit::{endpoint_error, CliResult, SUCCESS};
use crate::output::{print_delivery, OutputFormat};

pub fn run(args: OffsetArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.endpoint.config()?;
    let topic = args.endpoint.topic.as_str();

    let client = Endpoint::builder(topic, &args.uri)
        .config(config)
        .connect()
        .map_err(|err| endpoint_error("connect failed", err))?;
    let written = client
        .send_offset(args.value)
        .map_err(|err| endpoint_error("offset send failed", err))?;
    client.set_write_offset(args.value);

    let peer = client.remote_addr().map(|addr| addr.to_string());
    print_delivery(topic, peer.as_deref().or(Some(args.uri.as_str())), written, format);
    Ok(SUCCESS)
}

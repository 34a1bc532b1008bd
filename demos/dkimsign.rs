use dkim_modifier::{
    header::HeaderFields,
    modifier::{Modifier, ModifierConfig, SigningOutcome},
};
use std::{env, process};
use tokio::io::{self, AsyncReadExt};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut args = env::args();

    let (key_path_template, sender, selector, canonicalization) = match (
        args.next().as_deref(),
        args.next(),
        args.next(),
        args.next(),
        args.next(),
        args.next(),
    ) {
        (_, Some(template), Some(sender), selector, canon, None) => {
            (template, sender, selector, canon)
        }
        (program, ..) => {
            eprintln!(
                "usage: {} <key_path_template> <sender> [<selector> [<canonicalization>]]",
                program.unwrap_or("dkimsign")
            );
            process::exit(1);
        }
    };

    let mut config = ModifierConfig {
        key_path_template,
        ..Default::default()
    };
    if let Some(selector) = selector {
        config.selector = selector;
    }
    if let Some(canonicalization) = canonicalization {
        config.canonicalization = canonicalization.parse().unwrap_or_else(|e| {
            eprintln!("invalid canonicalization: {e}");
            process::exit(1);
        });
    }

    let modifier = Modifier::new(config).unwrap_or_else(|e| {
        eprintln!("invalid configuration: {e}");
        process::exit(1);
    });

    let mut msg = String::new();
    let n = io::stdin().read_to_string(&mut msg).await.unwrap();
    assert!(n > 0, "empty message on stdin");

    let msg = msg.replace("\r\n", "\n").replace('\n', "\r\n");

    let (header, body) = msg.split_once("\r\n\r\n").unwrap_or((&msg, ""));

    let mut headers: HeaderFields = header.parse().unwrap_or_else(|e| {
        eprintln!("invalid message header: {e}");
        process::exit(1);
    });

    let mut state = modifier.state_for_message();

    if let Err(e) = state.rewrite_sender(&sender).await {
        eprintln!("ERROR: {e}");
        process::exit(1);
    }

    match state.rewrite_body(&mut headers, body.as_bytes()) {
        Ok(SigningOutcome::Signed { domain, selector }) => {
            eprintln!("signed for {domain} with selector {selector}");
        }
        Ok(outcome) => {
            eprintln!("not signed: {outcome:?}");
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }
    }

    state.close().unwrap();

    let header = String::from_utf8_lossy(&headers.to_bytes()).replace("\r\n", "\n");
    print!("{header}\n{}", body.replace("\r\n", "\n"));
}

//! Pub/sub commands: the subscribe family, PUBLISH and PUBSUB introspection.
//!
//! Subscribe confirmations are one frame per channel; the trailing integer
//! is the connection's combined subscription count after that step.

use crate::commands::context::{CommandContext, CommandOutcome, HandlerResult};
use crate::commands::CommandError;
use crate::pattern::Pattern;
use crate::resp::RespValue;

fn confirmation(kind: &str, subject: Option<&[u8]>, count: usize) -> RespValue {
    RespValue::Array(vec![
        RespValue::bulk(kind.as_bytes().to_vec()),
        match subject {
            Some(subject) => RespValue::bulk(subject.to_vec()),
            None => RespValue::NullBulkString,
        },
        RespValue::Integer(count as i64),
    ])
}

pub fn subscribe(channels: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let mut frames = Vec::with_capacity(channels.len());

    for channel in channels {
        if ctx.state.channels.insert(channel.clone()) {
            ctx.shared
                .bus
                .subscribe(&channel, ctx.state.id, ctx.handle.outbox.clone());
        }

        frames.push(confirmation(
            "subscribe",
            Some(&channel),
            ctx.state.subscription_count(),
        ));
    }

    Ok(CommandOutcome::Frames(frames))
}

pub fn unsubscribe(channels: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let targets = if channels.is_empty() {
        ctx.state.channels.iter().cloned().collect()
    } else {
        channels
    };

    if targets.is_empty() {
        return Ok(CommandOutcome::Frames(vec![confirmation(
            "unsubscribe",
            None,
            ctx.state.subscription_count(),
        )]));
    }

    let mut frames = Vec::with_capacity(targets.len());
    for channel in targets {
        if ctx.state.channels.remove(&channel) {
            ctx.shared.bus.unsubscribe(&channel, ctx.state.id);
        }

        frames.push(confirmation(
            "unsubscribe",
            Some(&channel),
            ctx.state.subscription_count(),
        ));
    }

    Ok(CommandOutcome::Frames(frames))
}

pub fn psubscribe(sources: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    // Validate every pattern before registering any of them.
    let patterns = sources
        .iter()
        .map(|source| Pattern::parse(source).map_err(|_| CommandError::PatternNotImplemented))
        .collect::<Result<Vec<Pattern>, CommandError>>()?;

    let mut frames = Vec::with_capacity(sources.len());
    for (source, pattern) in sources.into_iter().zip(patterns) {
        if ctx.state.patterns.insert(source.clone()) {
            ctx.shared
                .bus
                .psubscribe(&source, pattern, ctx.state.id, ctx.handle.outbox.clone());
        }

        frames.push(confirmation(
            "psubscribe",
            Some(&source),
            ctx.state.subscription_count(),
        ));
    }

    Ok(CommandOutcome::Frames(frames))
}

pub fn punsubscribe(sources: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let targets = if sources.is_empty() {
        ctx.state.patterns.iter().cloned().collect()
    } else {
        sources
    };

    if targets.is_empty() {
        return Ok(CommandOutcome::Frames(vec![confirmation(
            "punsubscribe",
            None,
            ctx.state.subscription_count(),
        )]));
    }

    let mut frames = Vec::with_capacity(targets.len());
    for source in targets {
        if ctx.state.patterns.remove(&source) {
            ctx.shared.bus.punsubscribe(&source, ctx.state.id);
        }

        frames.push(confirmation(
            "punsubscribe",
            Some(&source),
            ctx.state.subscription_count(),
        ));
    }

    Ok(CommandOutcome::Frames(frames))
}

pub fn publish(channel: Vec<u8>, message: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let delivered = ctx.shared.bus.publish(&channel, &message);
    Ok(CommandOutcome::Reply(RespValue::Integer(delivered as i64)))
}

pub fn pubsub(mut args: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let subcommand = args.remove(0).to_ascii_uppercase();

    match subcommand.as_slice() {
        b"CHANNELS" if args.len() <= 1 => {
            let filter = match args.first() {
                Some(source) => Some(
                    Pattern::parse(source).map_err(|_| CommandError::PatternNotImplemented)?,
                ),
                None => None,
            };

            let channels = ctx
                .shared
                .bus
                .active_channels(filter.as_ref())
                .into_iter()
                .map(RespValue::bulk)
                .collect();

            Ok(CommandOutcome::Reply(RespValue::Array(channels)))
        }
        b"NUMSUB" => {
            let mut reply = Vec::with_capacity(args.len() * 2);
            for channel in args {
                let count = ctx.shared.bus.subscriber_count(&channel);
                reply.push(RespValue::bulk(channel));
                reply.push(RespValue::Integer(count as i64));
            }

            Ok(CommandOutcome::Reply(RespValue::Array(reply)))
        }
        b"NUMPAT" if args.is_empty() => Ok(CommandOutcome::Reply(RespValue::Integer(
            ctx.shared.bus.pattern_count() as i64,
        ))),
        _ => Err(CommandError::UnknownSubcommand(
            String::from_utf8_lossy(&subcommand).to_lowercase(),
        )),
    }
}

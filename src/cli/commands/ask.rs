//! Ask command.

use std::path::PathBuf;

use super::{print_json, report_error};
use crate::Dataroom;
use crate::documents::Category;
use crate::error::RagError;
use crate::generation::ChatCompletionsGenerator;
use crate::io::{EntityType, Envelope, table};
use crate::retrieval::{AnswerPayload, RetrievalRequest};

pub async fn run_ask(
    room: &Dataroom,
    text: Option<String>,
    image: Option<PathBuf>,
    context_only: bool,
    category: Option<Category>,
    json: bool,
) -> u8 {
    let request = RetrievalRequest {
        text,
        image,
        category,
    };

    let result = if context_only {
        room.retrieve(&request)
    } else {
        match ChatCompletionsGenerator::new(room.settings().generation.clone()) {
            Ok(generator) => room.answer(&request, &generator).await,
            Err(e) => Err(RagError::from(e)),
        }
    };

    match result {
        Ok(payload) => {
            if json {
                return print_json(&envelope(&payload));
            }
            print_payload(&payload, context_only);
            if payload.found() { 0 } else { 1 }
        }
        Err(e) => report_error(&e, json),
    }
}

fn envelope(payload: &AnswerPayload) -> Envelope<&AnswerPayload> {
    let envelope = if payload.found() {
        Envelope::success(payload)
    } else {
        Envelope::not_found("No relevant content found").with_data(payload)
    };
    let envelope = envelope
        .with_entity_type(EntityType::Answer)
        .with_count(payload.citations.len());
    match &payload.query {
        Some(q) => envelope.with_query(q.clone()),
        None => envelope,
    }
}

fn print_payload(payload: &AnswerPayload, context_only: bool) {
    if let Some(answer) = &payload.answer {
        println!("{answer}");
        if !payload.citations.is_empty() {
            println!();
        }
    }

    if !payload.found() {
        if payload.answer.is_none() {
            eprintln!("No relevant content found.");
        }
        return;
    }

    if context_only {
        println!("{}", payload.answer_context);
        println!();
    }
    println!("Intent: {}", payload.intent.as_str());
    println!("{}", table::citations(&payload.citations));

    if !payload.image_paths.is_empty() {
        println!();
        println!("Images:");
        for path in &payload.image_paths {
            println!("  {path}");
        }
    }
}

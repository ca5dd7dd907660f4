//! # Chatbot response selector
//!
//! Canned, rule-based replies. Rules are an ordered list of
//! `(pattern, response pool)` pairs evaluated top-down and the first match
//! wins, so a topic keyword shadows a greeting in the same message.

use std::time::Instant;

use rand::{Rng, seq::SliceRandom};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PipelineError;
use crate::events::{NewChatInteraction, RequestMetadata};
use crate::repositories::{ChatLogRepository, RowId};

/// Which rule produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Product,
    Price,
    Help,
    Company,
    Contact,
    Order,
    Shipping,
    Greeting,
    Farewell,
    Default,
}

/// Suggested follow-up shown as a button; `message` is sent when clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuickReply {
    pub text: String,
    pub message: String,
}

impl QuickReply {
    fn new(text: &str, message: &str) -> Self {
        Self {
            text: text.to_string(),
            message: message.to_string(),
        }
    }
}

/// Selected reply for one user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChatReply {
    pub topic: Topic,
    pub response: String,
    pub quick_replies: Vec<QuickReply>,
}

struct ResponseRule {
    topic: Topic,
    pattern: Regex,
    pool: Vec<String>,
}

struct QuickReplyRule {
    pattern: Regex,
    replies: Vec<QuickReply>,
}

/// Ordered first-match rule table.
pub struct ChatbotResponder {
    rules: Vec<ResponseRule>,
    default_pool: Vec<String>,
    quick_reply_rules: Vec<QuickReplyRule>,
    default_quick_replies: Vec<QuickReply>,
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|err| panic!("invalid chatbot pattern {source}: {err}"))
}

fn pool(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

impl ChatbotResponder {
    /// Build the rule table; `assistant_name` is used in greetings.
    pub fn new(assistant_name: &str) -> Self {
        let rules = vec![
            ResponseRule {
                topic: Topic::Product,
                pattern: pattern(r"producto|product|item"),
                pool: pool(&[
                    "Tenemos un catálogo amplio de productos. ¿Buscas alguna categoría en particular?",
                    "Los productos más vistos esta semana están en la portada de la tienda. ¿Qué necesitas?",
                    "Con gusto te oriento sobre nuestros productos. ¿Para qué lo vas a usar?",
                ]),
            },
            ResponseRule {
                topic: Topic::Price,
                pattern: pattern(r"precio|cost|cuanto|price"),
                pool: pool(&[
                    "El precio depende del producto. ¿Cuál te interesa?",
                    "Tenemos opciones para distintos presupuestos. ¿Cuánto quieres invertir?",
                    "Puedo ayudarte a filtrar productos por precio. ¿Tienes un rango en mente?",
                ]),
            },
            ResponseRule {
                topic: Topic::Help,
                pattern: pattern(r"ayuda|help|problema|issue"),
                pool: pool(&[
                    "Cuéntame qué ocurre y vemos cómo resolverlo.",
                    "Claro, te ayudo. ¿Me das un poco más de detalle?",
                    "Estoy para ayudarte. ¿Qué necesitas exactamente?",
                ]),
            },
            ResponseRule {
                topic: Topic::Company,
                pattern: pattern(r"empresa|company|nosotros"),
                pool: pool(&[
                    "Somos un equipo pequeño que diseña tecnología práctica para el día a día.",
                    "Llevamos varios años acercando soluciones tecnológicas útiles a nuestros clientes.",
                    "¿Quieres saber más sobre el equipo o sobre cómo trabajamos?",
                ]),
            },
            ResponseRule {
                topic: Topic::Contact,
                pattern: pattern(r"contacto|contact|telefono|email"),
                pool: pool(&[
                    "Puedes escribirnos desde el formulario de contacto o por email. ¿Qué prefieres?",
                    "Atendemos por varios canales. ¿Cómo quieres que te contactemos?",
                    "Si lo prefieres, te pongo en contacto con una persona del equipo.",
                ]),
            },
            ResponseRule {
                topic: Topic::Order,
                pattern: pattern(r"pedido|order|compra"),
                pool: pool(&[
                    "Para revisar tu pedido necesito el número de orden. ¿Lo tienes?",
                    "Los pedidos se preparan en un plazo de 24 a 48 horas. ¿Tienes alguna duda concreta?",
                    "¿Es sobre un pedido existente o quieres hacer uno nuevo?",
                ]),
            },
            ResponseRule {
                topic: Topic::Shipping,
                pattern: pattern(r"envio|shipping|delivery"),
                pool: pool(&[
                    "Enviamos a todo el país; el plazo depende del destino. ¿A dónde lo necesitas?",
                    "Hay envío estándar y urgente. ¿Quieres que te cuente las diferencias?",
                    "Dime tu código postal y te indico el plazo estimado.",
                ]),
            },
            ResponseRule {
                topic: Topic::Greeting,
                pattern: pattern(r"(?i)\b(hola|hello|hi|buenas|hey|saludos)\b"),
                pool: vec![
                    format!("¡Hola! Soy {assistant_name}. ¿En qué puedo ayudarte?"),
                    "¡Hola! Qué bueno verte por aquí. ¿Qué necesitas hoy?".to_string(),
                    format!("¡Buenas! {assistant_name} al habla. Cuéntame qué buscas."),
                ],
            },
            ResponseRule {
                topic: Topic::Farewell,
                pattern: pattern(r"(?i)\b(gracias|thanks|chao|bye|adiós|hasta luego)\b"),
                pool: pool(&[
                    "¡A ti! Si necesitas algo más, aquí estaré.",
                    "¡Con gusto! Que tengas un gran día.",
                    "Me alegra haberte ayudado. ¡Hasta pronto!",
                ]),
            },
        ];

        let default_pool = pool(&[
            "Buena pregunta. ¿Me das algún detalle más?",
            "Entiendo. ¿Hay algo concreto que quieras saber?",
            "Para ayudarte mejor, ¿puedes contarme un poco más?",
            "Puedo pasar tu consulta a nuestro equipo si lo prefieres.",
        ]);

        let quick_reply_rules = vec![
            QuickReplyRule {
                pattern: pattern(r"(?i)producto|item|shop"),
                replies: vec![
                    QuickReply::new("Novedades", "Quiero ver las novedades"),
                    QuickReply::new("Más vendidos", "¿Cuáles son los más vendidos?"),
                    QuickReply::new("Ofertas", "¿Qué ofertas hay ahora?"),
                ],
            },
            QuickReplyRule {
                pattern: pattern(r"(?i)contacto|contact|hablar"),
                replies: vec![
                    QuickReply::new("Email", "¿Cuál es el email de contacto?"),
                    QuickReply::new("Teléfono", "¿Tienen teléfono de atención?"),
                    QuickReply::new("WhatsApp", "¿Atienden por WhatsApp?"),
                ],
            },
            QuickReplyRule {
                pattern: pattern(r"(?i)pedido|order|compra"),
                replies: vec![
                    QuickReply::new("Estado del pedido", "Quiero saber el estado de mi pedido"),
                    QuickReply::new("Modificar pedido", "Necesito cambiar mi pedido"),
                    QuickReply::new("Cancelar", "Quiero cancelar mi pedido"),
                ],
            },
        ];

        let default_quick_replies = vec![
            QuickReply::new("Ver productos", "Quiero ver sus productos"),
            QuickReply::new("Más ayuda", "Necesito más ayuda"),
            QuickReply::new("Hablar con el equipo", "Quiero hablar con una persona"),
        ];

        Self {
            rules,
            default_pool,
            quick_reply_rules,
            default_quick_replies,
        }
    }

    /// Topic of the first rule matching `message`.
    pub fn classify(&self, message: &str) -> Topic {
        let normalized = message.trim().to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(&normalized))
            .map(|rule| rule.topic)
            .unwrap_or(Topic::Default)
    }

    /// Candidate responses for `topic`.
    pub fn pool(&self, topic: Topic) -> &[String] {
        self.rules
            .iter()
            .find(|rule| rule.topic == topic)
            .map(|rule| rule.pool.as_slice())
            .unwrap_or(&self.default_pool)
    }

    pub fn quick_replies(&self, message: &str) -> Vec<QuickReply> {
        let normalized = message.to_lowercase();
        self.quick_reply_rules
            .iter()
            .find(|rule| rule.pattern.is_match(&normalized))
            .map(|rule| rule.replies.clone())
            .unwrap_or_else(|| self.default_quick_replies.clone())
    }

    pub fn respond(&self, message: &str) -> ChatReply {
        self.respond_with(message, &mut rand::thread_rng())
    }

    /// Select a reply drawing the pool entry from `rng`.
    pub fn respond_with<R: Rng + ?Sized>(&self, message: &str, rng: &mut R) -> ChatReply {
        let topic = self.classify(message);
        let response = self.pool(topic).choose(rng).cloned().unwrap_or_default();

        ChatReply {
            topic,
            response,
            quick_replies: self.quick_replies(message),
        }
    }
}

/// Answer `message` and record the exchange with its measured response time.
pub async fn converse(
    responder: &ChatbotResponder,
    chat_log: &ChatLogRepository,
    message: String,
    meta: RequestMetadata,
) -> Result<(ChatReply, RowId), PipelineError> {
    let started = Instant::now();
    let reply = responder.respond(&message);
    let response_time_ms = i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX);

    let row_id = chat_log
        .insert(NewChatInteraction {
            user_message: message,
            bot_response: reply.response.clone(),
            response_time_ms,
            meta,
        })
        .await?;

    Ok((reply, row_id))
}

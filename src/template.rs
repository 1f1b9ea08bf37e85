//! Message body template.
//!
//! Placeholders are written as `{name}`; `{{` and `}}` produce literal
//! braces. Templates are validated when constructed so a bad configuration
//! fails at startup rather than halfway through a batch.

use crate::recipient::RecipientRecord;

/// Default login URL shown in messages.
pub const DEFAULT_LOGIN_URL: &str = "mi_link.com";

/// Default message body.
pub const DEFAULT_TEMPLATE: &str = "👋 Hola estimado {guardian},

Nos complace informarle que su hijo(a) {student} ha sido registrado en el ✨ Sistema Vocacional ✨.

🔑 Credenciales de acceso:
👤 Usuario: {username}
🔒 Contraseña: {password}

🌐 Ingrese a: {login_url}

📅 Le recomendamos que su hijo(a) inicie sesión lo antes posible y cambie su contraseña por motivos de seguridad 🔐.

Si tiene alguna consulta, no dude en contactarnos.
Gracias por su confianza 🙏 y esperamos acompañar el desarrollo académico de su hijo(a) 📚.";

const PLACEHOLDERS: &[&str] = &[
    "guardian",
    "student",
    "student_first_name",
    "student_last_name",
    "username",
    "password",
    "login_url",
];

/// Errors from parsing or rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// `{name}` where `name` is not a known placeholder.
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    /// A `{` without a closing `}`.
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    /// A lone `}` outside a placeholder.
    #[error("unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),
}

/// Template text plus the login URL it points recipients to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    body: String,
    login_url: String,
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self {
            body: DEFAULT_TEMPLATE.to_owned(),
            login_url: DEFAULT_LOGIN_URL.to_owned(),
        }
    }
}

impl MessageTemplate {
    /// Build a template, checking every placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the body is malformed or references an
    /// unknown placeholder.
    pub fn new(
        body: impl Into<String>,
        login_url: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        let template = Self {
            body: body.into(),
            login_url: login_url.into(),
        };
        template.expand(|_| Some(String::new()))?;
        Ok(template)
    }

    /// The configured login URL.
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    /// Render the message for one recipient.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the body is malformed.
    pub fn render(&self, record: &RecipientRecord) -> Result<String, TemplateError> {
        let rendered = self.expand(|name| {
            let value = match name {
                "guardian" => record.guardian_name.clone(),
                "student" => record.student_full_name(),
                "student_first_name" => record.student_first_name.clone(),
                "student_last_name" => record.student_last_name.clone(),
                "username" => record.username.clone(),
                "password" => record.password.clone(),
                "login_url" => self.login_url.clone(),
                _ => return None,
            };
            Some(value)
        })?;
        Ok(rendered.trim().to_owned())
    }

    fn expand(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String, TemplateError> {
        let body = self.body.as_str();
        let mut out = String::with_capacity(body.len());
        let mut rest = body;

        while let Some(pos) = rest.find(['{', '}']) {
            let offset = body.len().saturating_sub(rest.len()).saturating_add(pos);
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if let Some(after) = tail.strip_prefix("{{") {
                out.push('{');
                rest = after;
            } else if let Some(after) = tail.strip_prefix("}}") {
                out.push('}');
                rest = after;
            } else if tail.starts_with('}') {
                return Err(TemplateError::UnmatchedClose(offset));
            } else {
                let close = tail.find('}').ok_or(TemplateError::Unterminated(offset))?;
                let name = tail[1..close].trim();
                if !PLACEHOLDERS.contains(&name) {
                    return Err(TemplateError::UnknownPlaceholder(name.to_owned()));
                }
                let value =
                    lookup(name).ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_owned()))?;
                out.push_str(&value);
                rest = &tail[close.saturating_add(1)..];
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

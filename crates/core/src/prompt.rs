use crate::models::RetrievalHit;
use providers::ChatMessage;

pub const SYSTEM_DIRECTIVE: &str = "You are Health Compass, an educational health information assistant.

CRITICAL SAFETY RULES (NEVER VIOLATE):
1. NEVER diagnose medical conditions.
2. NEVER provide treatment recommendations.
3. NEVER suggest medications or dosages.
4. Use ONLY the provided context from trusted sources. If the context does not answer the question, say so.
5. Cite sources by organization name (e.g. \"According to MedlinePlus...\" or \"The CDC states...\").
6. ALWAYS include a reminder to consult a qualified healthcare professional.
7. If the context describes symptoms that require urgent or emergency care, say so clearly and tell the user to call 911 or seek emergency care.
8. Use simple, clear language accessible to the general public.

Your only role is education: helping people understand health information so they can have informed conversations with their doctors.";

/// Formats retrieved chunks as numbered, source-labelled context blocks.
pub fn format_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let c = &hit.chunk;
            format!(
                "[Source {n}] {source} - {title}\nOrganization: {org}\nCredibility: {cred}\nContent: {text}\n",
                n = i + 1,
                source = c.source,
                title = c.title,
                org = c.organization,
                cred = c.credibility,
                text = c.text,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_messages(query: &str, hits: &[RetrievalHit]) -> Vec<ChatMessage> {
    let user = format!(
        "Medical Context from Trusted Sources:\n\n{context}\n---\n\nUser's Question: {query}\n\n\
         Please provide an educational response that:\n\
         1. Explains the topic clearly using simple language\n\
         2. Cites which sources you are drawing from (mention the organization name)\n\
         3. Includes a reminder to consult healthcare professionals\n\
         4. Flags if this topic requires immediate medical attention\n\n\
         Educational Response:",
        context = format_context(hits),
        query = query.trim(),
    );
    vec![ChatMessage::system(SYSTEM_DIRECTIVE), ChatMessage::user(user)]
}

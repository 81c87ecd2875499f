//! Built-in prompt templates.
//!
//! Every template pins the JSON shape it expects back: required keys are
//! listed explicitly, unknown scalars are `null` and unknown lists `[]`.

use super::{TemplateRegistry, TemplateSpec, DEFAULT_CONTEXT};

pub const GENERAL: TemplateSpec = TemplateSpec {
    name: "general",
    uses_known_categories: true,
    body: r#"You are a document archivist. Classify the document below and extract its key metadata.

Categories already in use: {{KNOWN_CATEGORIES}}
Reuse one of them when it fits; otherwise propose a short, generic category name (two or three words, no document numbers or dates).

User instruction: {{USER_INSTRUCTION}}

Answer with a single JSON object and nothing else, using exactly this shape:
{
  "category": "string",
  "metadata": {
    "title": "string or null",
    "summary": "one or two sentences",
    "document_date": "YYYY-MM-DD or null",
    "issuer": "string or null",
    "recipient": "string or null",
    "identifiers": [],
    "keywords": []
  }
}
Use null for any value you cannot find and [] for empty lists.

Document text:
"""
{{ANALYSIS_TEXT}}
"""
"#,
};

pub const FINANCIAL: TemplateSpec = TemplateSpec {
    name: "financial",
    uses_known_categories: false,
    body: r#"You are an accounts clerk reviewing a financial document (invoice, receipt, bank slip, statement, tax form).
Today is {{CURRENT_DATE}}; use it to judge whether a due date has passed.

User instruction: {{USER_INSTRUCTION}}

Answer with a single JSON object and nothing else, using exactly this shape:
{
  "category": "string",
  "metadata": {
    "summary": "one sentence",
    "issuer": "string or null",
    "issuer_tax_id": "string or null",
    "payer": "string or null",
    "document_number": "string or null",
    "issue_date": "YYYY-MM-DD or null",
    "due_date": "YYYY-MM-DD or null",
    "overdue": "true, false or null",
    "total_amount": "number or null",
    "currency": "ISO 4217 code or null",
    "line_items": [],
    "payment_codes": []
  }
}
Use null for any value you cannot find and [] for empty lists.

Document text:
"""
{{ANALYSIS_TEXT}}
"""
"#,
};

pub const LEGAL: TemplateSpec = TemplateSpec {
    name: "legal",
    uses_known_categories: false,
    body: r#"You are a paralegal indexing a legal document (contract, power of attorney, court filing, notice).

User instruction: {{USER_INSTRUCTION}}

Answer with a single JSON object and nothing else, using exactly this shape:
{
  "category": "string",
  "metadata": {
    "summary": "one or two sentences",
    "parties": [],
    "case_number": "string or null",
    "court_or_registry": "string or null",
    "signed_date": "YYYY-MM-DD or null",
    "effective_date": "YYYY-MM-DD or null",
    "expiry_date": "YYYY-MM-DD or null",
    "obligations": [],
    "signatures_present": "true, false or null",
    "validation_codes": []
  }
}
Use null for any value you cannot find and [] for empty lists.
Signatures and validation codes are usually at the end of the text; check it carefully.

Document text:
"""
{{ANALYSIS_TEXT}}
"""
"#,
};

pub const HUMAN_RESOURCES: TemplateSpec = TemplateSpec {
    name: "human_resources",
    uses_known_categories: false,
    body: r#"You are an HR assistant filing an employee-related document (payslip, employment contract, leave request, certificate, evaluation).

User instruction: {{USER_INSTRUCTION}}

Answer with a single JSON object and nothing else, using exactly this shape:
{
  "category": "string",
  "metadata": {
    "summary": "one sentence",
    "employee_name": "string or null",
    "employee_id": "string or null",
    "employer": "string or null",
    "position": "string or null",
    "reference_period": "string or null",
    "document_date": "YYYY-MM-DD or null",
    "gross_amount": "number or null",
    "net_amount": "number or null",
    "contains_sensitive_data": "true, false or null",
    "topics": []
  }
}
Use null for any value you cannot find and [] for empty lists.

Document text:
"""
{{ANALYSIS_TEXT}}
"""
"#,
};

pub const EDUCATIONAL: TemplateSpec = TemplateSpec {
    name: "educational_management",
    uses_known_categories: false,
    body: r#"You are a school secretary classifying a document from educational management.

User instruction: {{USER_INSTRUCTION}}

Answer with a single JSON object and nothing else, using exactly this shape:
{
  "category": "string",
  "metadata": {
    "summary": "one sentence",
    "institution": "string or null",
    "school_year": "string or null",
    "document_date": "YYYY-MM-DD or null",
    "people": [],
    "topics": []
  }
}
Use null for any value you cannot find and [] for empty lists.

Document text:
"""
{{ANALYSIS_TEXT}}
"""
"#,
};

pub const SCHOOL_RECORDS: TemplateSpec = TemplateSpec {
    name: "educational_management/school_records",
    uses_known_categories: false,
    body: r#"You are a school registrar classifying a student record (enrollment, transcript, report card, transfer, attendance).

User instruction: {{USER_INSTRUCTION}}

Answer with a single JSON object and nothing else, using exactly this shape:
{
  "category": "string",
  "metadata": {
    "summary": "one sentence",
    "student_name": "string or null",
    "student_id": "string or null",
    "grade_level": "string or null",
    "class_group": "string or null",
    "school_year": "string or null",
    "institution": "string or null",
    "guardians": [],
    "grades": [],
    "attendance_rate": "number or null"
  }
}
Use null for any value you cannot find and [] for empty lists.

Document text:
"""
{{ANALYSIS_TEXT}}
"""
"#,
};

pub const PEDAGOGICAL: TemplateSpec = TemplateSpec {
    name: "educational_management/pedagogical",
    uses_known_categories: false,
    body: r#"You are a pedagogical coordinator classifying teaching material (lesson plan, curriculum, assessment, project, meeting minutes).

User instruction: {{USER_INSTRUCTION}}

Answer with a single JSON object and nothing else, using exactly this shape:
{
  "category": "string",
  "metadata": {
    "summary": "one or two sentences",
    "subject": "string or null",
    "grade_level": "string or null",
    "author": "string or null",
    "period": "string or null",
    "learning_objectives": [],
    "competencies": [],
    "assessment_methods": []
  }
}
Use null for any value you cannot find and [] for empty lists.

Document text:
"""
{{ANALYSIS_TEXT}}
"""
"#,
};

pub const ADMINISTRATIVE: TemplateSpec = TemplateSpec {
    name: "educational_management/administrative",
    uses_known_categories: false,
    body: r#"You are a school administrator classifying an administrative document (official letter, circular, ordinance, purchase, inventory, budget).
Today is {{CURRENT_DATE}}.

User instruction: {{USER_INSTRUCTION}}

Answer with a single JSON object and nothing else, using exactly this shape:
{
  "category": "string",
  "metadata": {
    "summary": "one sentence",
    "sender": "string or null",
    "recipients": [],
    "reference_number": "string or null",
    "document_date": "YYYY-MM-DD or null",
    "deadline": "YYYY-MM-DD or null",
    "amount": "number or null",
    "actions_required": []
  }
}
Use null for any value you cannot find and [] for empty lists.

Document text:
"""
{{ANALYSIS_TEXT}}
"""
"#,
};

pub const EDUCATIONAL_CONTEXT: &str = "educational_management";

/// The registry used in production. Always passes `validate()`.
pub fn builtin() -> TemplateRegistry {
    let mut registry = TemplateRegistry::new();

    registry.register(DEFAULT_CONTEXT, None, GENERAL);
    registry.register("financial", None, FINANCIAL);
    registry.register("legal", None, LEGAL);
    registry.register("human_resources", None, HUMAN_RESOURCES);

    registry.register(EDUCATIONAL_CONTEXT, None, EDUCATIONAL);
    registry.register(EDUCATIONAL_CONTEXT, Some("school_records"), SCHOOL_RECORDS);
    registry.register(EDUCATIONAL_CONTEXT, Some("pedagogical"), PEDAGOGICAL);
    registry.register(EDUCATIONAL_CONTEXT, Some("administrative"), ADMINISTRATIVE);

    registry
}

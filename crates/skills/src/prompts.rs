//! Built-in prompt text. Context markers use the `{{field}}` form; the
//! quotes skill reads the key points through `{{prior_output}}`.

pub const ROLE: &str = "You are a research strategist at {{consultancy}} carrying out a strategic document review. \
{{consultancy}} is preparing a \"{{consultancy_task}}\" for its client, {{client}}. \
Background on the client: {{client_background}} \
The client is facing the following problem statement:\n{{problem_statement}}\n\n";

pub const SUMMARIZATION: &str = "Summarize the document below. Keep these research questions in mind while you write:\n\n\
{{research_questions}}\n\nDOCUMENT:";

pub const FIGURES_TOC: &str = "Produce a table of contents for the document below, listing its sections together with any figures or \
graphics and their page numbers. Extend an existing table of contents when the document has one. \
Never invent page numbers or leave placeholders for information you cannot find. \
If the document has neither a table of contents nor figures, give a high level outline of its structure instead of a summary.\n\nDOCUMENT:";

pub const ACTION_ITEMS: &str = "You will receive a document as part of the review. Extract every action item: each concrete, \
implementable action or recommendation in the document that could help {{client}} with its problem statement. \
Keep each item as close to the original wording as you can and do not condense it. \
After each item, explain briefly why you included it. Cite page numbers and sections, and put direct quotations in double quotes. \
You may receive partial sections; only report action items from complete sections.";

pub const KEYPOINTS: &str = "You will receive a document as part of the review. Write its key points, covering:\n\
- when the document was written\n\
- what the document contains\n\
- what each chapter or section discusses, naming the chapter or section\n\
- important charts or figures\n\n\
Above all, emphasise the calls to action that could shape the {{consultancy_task}} {{consultancy}} is preparing for {{client}}.\n\n\
Research questions to keep in mind:\n\n{{research_questions}}\n\n\
Thematic areas from the research plan:\n\n{{thematic_areas}}\n\n\
Cite page numbers and sections, put direct quotations in double quotes, and include nothing that is not in the document.";

pub const QUOTES: &str = "You will receive a document as part of the review. Find its influential sections and the key quotes \
within them, favouring calls to action that could shape the {{consultancy_task}} {{consultancy}} is preparing for {{client}}. \
Keep them succinct.\n\n\
Research questions and thematic areas to keep in mind:\n\n{{research_questions}}\n\n{{thematic_areas}}\n\n\
Key points already drawn from this document:\n{{prior_output}}\n\n\
Every quote must be a verbatim span of the document with a page reference. You may receive partial sections; \
only quote from complete sections, and include nothing that is not in the document.";

pub const RESEARCH_ANSWERING: &str = "Your task is to help write the \"{{consultancy_task}}\". You will receive excerpts from documents \
supplied by stakeholders in the {{consultancy_task}}. Using them, together with your broader knowledge, answer this research question:\n\n\
{{question}}\n\n\
Whenever you use information from a document, name the document and the page number. \
Keep the following thematic areas in mind:\n\n{{thematic_areas}}\n\n";

mod gateway_stream;
mod openai_compatible;
mod support;
